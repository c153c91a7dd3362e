//! Built-in compute handlers.
//!
//! The server binary selects one of these by name; library users usually
//! supply their own [`ComputeHandler`] or closure instead.

use crate::array::{ArrayMap, DType, NdArray};
use crate::dispatcher::ComputeHandler;
use anyhow::{bail, Context};
use arrow::compute::kernels::numeric;
use std::sync::Arc;

/// Returns its input unchanged. Turns the server into a plain store.
#[derive(Debug, Clone, Copy, Default)]
pub struct Echo;

impl ComputeHandler for Echo {
    fn compute(&self, _command: &str, input: ArrayMap) -> anyhow::Result<ArrayMap> {
        Ok(input)
    }
}

/// Multiplies every numeric element by two, keeping names and shapes.
///
/// Integer overflow is an error rather than a wrap.
#[derive(Debug, Clone, Copy, Default)]
pub struct Double;

impl ComputeHandler for Double {
    fn compute(&self, _command: &str, input: ArrayMap) -> anyhow::Result<ArrayMap> {
        input
            .into_iter()
            .map(|(name, array)| -> anyhow::Result<(String, NdArray)> {
                if array.dtype() == Some(DType::Utf8) {
                    bail!("cannot double string column {}", name);
                }
                let doubled = numeric::add(array.values(), array.values())
                    .with_context(|| format!("doubling column {}", name))?;
                let doubled = NdArray::new(doubled).with_shape(array.shape().to_vec())?;
                Ok((name, doubled))
            })
            .collect()
    }
}

/// Look up a built-in handler by name.
pub fn by_name(name: &str) -> Option<Arc<dyn ComputeHandler>> {
    match name {
        "echo" => Some(Arc::new(Echo)),
        "double" => Some(Arc::new(Double)),
        _ => None,
    }
}

/// Names accepted by [`by_name`].
pub const BUILTIN: &[&str] = &["echo", "double"];
