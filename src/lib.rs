//! lanempsc - Bounded Lock-Free Compound MPSC Queue
//!
//! A bounded multi-producer single-consumer queue built as a compound of
//! parallel MPSC lanes. Producers are striped across lanes by a per-thread
//! id, which diffuses the CAS contention a single producer cursor would
//! concentrate; one consumer scans the lanes round-robin.
//!
//! # Key properties
//!
//! - Lock-free strict offer, wait-free everything else; the queue never
//!   parks or blocks.
//! - Full-versus-contention honesty: a strict offer fails only after
//!   observing every lane capacity-full in one pass, never because of a
//!   lost claim race.
//! - Per-lane FIFO. The compound can reorder elements of one producer when
//!   an offer spills to another lane; build with a parallelism of 1 when
//!   per-producer ordering matters.
//! - Cursors padded to their own cache lines; waiting strategies for the
//!   bulk loops are supplied by the caller.
//!
//! # Example
//!
//! ```
//! use lanempsc::CompoundQueue;
//!
//! let queue = CompoundQueue::with_parallelism(1024, 4).unwrap();
//!
//! assert!(queue.offer(7u64).is_ok());
//! assert_eq!(queue.size(), 1);
//!
//! // Single consumer thread:
//! assert_eq!(queue.poll(), Some(7));
//! assert_eq!(queue.relaxed_poll(), None);
//! ```

mod backoff;
mod compound;
mod config;
mod invariants;
mod lane;
mod metrics;

pub use backoff::Backoff;
pub use compound::{CompoundQueue, QueueError};
pub use config::Config;
pub use lane::{FastOffer, Lane};
pub use metrics::{Metrics, MetricsSnapshot};
