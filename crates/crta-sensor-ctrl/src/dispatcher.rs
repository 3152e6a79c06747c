//! Batch interpreter: walks an encoded batch and applies each record to a
//! [`SensorInterface`].
//!
//! The dispatcher is stateless.  It never retries and never runs records
//! concurrently; the first failing record aborts the rest of the batch and
//! records that already ran are not rolled back.

use crta_hal::{BufferInfo, SensorInterface};
use crta_types::{BufferRef, CrtaError};
use tracing::{debug, warn};

use crate::opcode::{END, MAGIC, SensorControlOp};

/// Result of one batch, handed to the completion callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    pub instance: u32,
    pub buffer: BufferRef,
    pub dva: u64,
    /// First error of the batch, if any.
    pub result: Result<(), CrtaError>,
}

/// Execute every record of `words` in order.
///
/// Returns the number of records applied.
///
/// # Errors
///
/// * [`CrtaError::InvalidMagic`] – the batch does not start with [`MAGIC`].
/// * [`CrtaError::UnknownOpcode`] – an opcode at or past the table end.
/// * [`CrtaError::MalformedTerminator`] – the word after the operands is not
///   [`END`].
/// * [`CrtaError::TruncatedBatch`] – the buffer ends inside a record.
/// * Any error the sensor returns for a record.
pub fn execute_batch(words: &[u32], sensor: &dyn SensorInterface) -> Result<usize, CrtaError> {
    let magic = words.first().copied().ok_or(CrtaError::TruncatedBatch {
        expected: 2,
        found: 0,
    })?;
    if magic != MAGIC {
        return Err(CrtaError::InvalidMagic(magic));
    }
    let count = *words.get(1).ok_or(CrtaError::TruncatedBatch {
        expected: 2,
        found: words.len(),
    })? as usize;

    let mut pos = 2;
    for applied in 0..count {
        let code = *words.get(pos).ok_or(CrtaError::TruncatedBatch {
            expected: pos + 1,
            found: words.len(),
        })?;
        let op = SensorControlOp::try_from(code)?;
        let args_end = pos + 1 + op.arity();
        if args_end >= words.len() {
            return Err(CrtaError::TruncatedBatch {
                expected: args_end + 1,
                found: words.len(),
            });
        }
        if words[args_end] != END {
            return Err(CrtaError::MalformedTerminator {
                opcode: code,
                found: words[args_end],
            });
        }
        let control = op.decode(&words[pos + 1..args_end])?;
        sensor.apply(&control).inspect_err(|err| {
            warn!(record = applied, ?op, %err, "sensor rejected control");
        })?;
        pos = args_end + 1;
    }
    Ok(count)
}

/// Run the batch stored in `buffer` and report the outcome to `complete`
/// exactly once.
pub fn dispatch(
    instance: u32,
    buffer: &BufferInfo,
    sensor: &dyn SensorInterface,
    complete: impl FnOnce(BatchOutcome),
) {
    let words = buffer.mem.snapshot();
    let result = execute_batch(&words, sensor).map(|applied| {
        debug!(instance, index = buffer.buffer.index, applied, "sensor-control batch done");
    });
    if let Err(err) = &result {
        warn!(instance, index = buffer.buffer.index, %err, "sensor-control batch aborted");
    }
    complete(BatchOutcome {
        instance,
        buffer: buffer.buffer,
        dva: buffer.dva,
        result,
    });
}
