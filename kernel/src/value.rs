//! Runtime values crossing the kernel boundary.
//!
//! Tensors carry a device tag, element type, sizes, strides, and a shared
//! host byte buffer. The `Gpu` device is a tag over host memory here; real
//! device compilers sit behind the code object contract and are outside
//! this crate.

use std::sync::Arc;

use smallvec::SmallVec;

use fuze_dtype::ScalarType;

/// Device kind of a runtime tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum DeviceKind {
    Cpu,
    Gpu,
}

/// One runtime argument or result.
#[derive(Debug, Clone)]
pub enum Value {
    Int(i32),
    Float(f32),
    Tensor(Tensor),
}

impl Value {
    pub fn device(&self) -> Option<DeviceKind> {
        match self {
            Self::Tensor(t) => Some(t.device()),
            _ => None,
        }
    }
}

/// A runtime tensor over shared host memory.
#[derive(Debug, Clone)]
pub struct Tensor {
    device: DeviceKind,
    dtype: ScalarType,
    sizes: SmallVec<[i64; 4]>,
    strides: SmallVec<[i64; 4]>,
    data: Arc<Vec<u8>>,
}

fn contiguous_strides(sizes: &[i64]) -> SmallVec<[i64; 4]> {
    let mut strides: SmallVec<[i64; 4]> = SmallVec::with_capacity(sizes.len());
    let mut stride = 1i64;
    for &size in sizes.iter().rev() {
        strides.push(stride);
        stride *= size;
    }
    strides.reverse();
    strides
}

impl Tensor {
    /// Contiguous `Float32` tensor over `data` in row-major order.
    pub fn from_f32(device: DeviceKind, sizes: &[i64], data: Vec<f32>) -> Self {
        debug_assert_eq!(sizes.iter().product::<i64>() as usize, data.len());
        let mut raw = Vec::with_capacity(data.len() * 4);
        for v in data {
            raw.extend_from_slice(&v.to_ne_bytes());
        }
        Self::from_raw(device, ScalarType::Float32, sizes, raw)
    }

    /// Contiguous `Int32` tensor over `data` in row-major order.
    pub fn from_i32(device: DeviceKind, sizes: &[i64], data: Vec<i32>) -> Self {
        debug_assert_eq!(sizes.iter().product::<i64>() as usize, data.len());
        let mut raw = Vec::with_capacity(data.len() * 4);
        for v in data {
            raw.extend_from_slice(&v.to_ne_bytes());
        }
        Self::from_raw(device, ScalarType::Int32, sizes, raw)
    }

    pub fn from_raw(device: DeviceKind, dtype: ScalarType, sizes: &[i64], raw: Vec<u8>) -> Self {
        Self {
            device,
            dtype,
            sizes: sizes.iter().copied().collect(),
            strides: contiguous_strides(sizes),
            data: Arc::new(raw),
        }
    }

    /// A strided view over the same storage. Sizes and strides are taken at
    /// face value; the caller keeps them within the buffer.
    pub fn with_layout(mut self, sizes: &[i64], strides: &[i64]) -> Self {
        self.sizes = sizes.iter().copied().collect();
        self.strides = strides.iter().copied().collect();
        self
    }

    pub fn device(&self) -> DeviceKind {
        self.device
    }

    pub fn dtype(&self) -> ScalarType {
        self.dtype
    }

    pub fn sizes(&self) -> &[i64] {
        &self.sizes
    }

    pub fn strides(&self) -> &[i64] {
        &self.strides
    }

    pub fn size(&self, dim: usize) -> i64 {
        self.sizes[dim]
    }

    pub fn stride(&self, dim: usize) -> i64 {
        self.strides[dim]
    }

    pub fn numel(&self) -> i64 {
        self.sizes.iter().product()
    }

    pub(crate) fn data_ptr(&self) -> *mut u8 {
        self.data.as_ptr() as *mut u8
    }

    /// Read a contiguous `Float32` tensor back into a vector.
    pub fn to_f32_vec(&self) -> Vec<f32> {
        debug_assert_eq!(self.dtype, ScalarType::Float32);
        self.data
            .chunks_exact(4)
            .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    /// Read a contiguous `Int32` tensor back into a vector.
    pub fn to_i32_vec(&self) -> Vec<i32> {
        debug_assert_eq!(self.dtype, ScalarType::Int32);
        self.data
            .chunks_exact(4)
            .map(|c| i32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }
}
