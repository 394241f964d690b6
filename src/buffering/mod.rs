//! Lock-free SPSC ring buffer for pending audio samples.
//!
//! Uses `ringbuf::HeapRb<i16>` whose wait-free `push_slice` keeps
//! `push_audio` off any lock or syscall once resampling is done. The
//! producer half is held by the media thread (inside the session record),
//! the consumer half by the session worker.

use ringbuf::{traits::Split, HeapRb};

pub use ringbuf::traits::{Consumer, Producer};

/// Type alias for the producer half — written by the media thread.
pub type AudioProducer = ringbuf::HeapProd<i16>;

/// Type alias for the consumer half — drained by the session worker.
pub type AudioConsumer = ringbuf::HeapCons<i16>;

/// Create a matched producer/consumer pair backed by a heap-allocated ring.
///
/// `capacity` is the maximum number of buffered samples; it bounds how much
/// audio can sit between the media thread and the worker under transport
/// backpressure. Samples that do not fit are dropped by the caller.
pub fn create_session_ring(capacity: usize) -> (AudioProducer, AudioConsumer) {
    HeapRb::<i16>::new(capacity.max(1)).split()
}
