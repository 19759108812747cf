//! Collective communication for a fixed group of ranks.
//!
//! Every collective must be entered by every rank of the group, in the same relative order.
//! The only primitive a backend has to provide is a personalised all-to-all exchange of byte
//! buffers; typed gathers and reductions are layered on top of it by [`CommExt`].
//!
//! Backends:
//! - [`SelfComm`]: a group consisting of a single rank.
//! - [`ThreadComm`]: a group of ranks living on threads of the same process, exchanging
//!   messages through a shared mailbox.
//! - `MpiComm` (feature `mpi-support`): one rank per MPI process.

use crate::error::CommError;
use bytemuck::Pod;
use bytes::Bytes;
use dashmap::DashMap;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// A fixed-size group of ranks supporting collective exchange.
pub trait Communicator {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    /// Sends `send[p]` to rank `p` and returns the buffers received from every rank,
    /// indexed by source rank.
    fn all_to_all_bytes(&self, send: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>, CommError>;

    /// Blocks until every rank of the group has entered the barrier.
    fn barrier(&self) -> Result<(), CommError> {
        self.all_to_all_bytes(vec![Vec::new(); self.size()]).map(|_| ())
    }

    /// Terminates the whole group after a fatal error on this rank.
    ///
    /// Peers blocked in (or later entering) a collective must not wait forever.
    fn abort(&self);
}

impl<'a, C: Communicator + ?Sized> Communicator for &'a C {
    fn rank(&self) -> usize {
        (**self).rank()
    }

    fn size(&self) -> usize {
        (**self).size()
    }

    fn all_to_all_bytes(&self, send: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>, CommError> {
        (**self).all_to_all_bytes(send)
    }

    fn barrier(&self) -> Result<(), CommError> {
        (**self).barrier()
    }

    fn abort(&self) {
        (**self).abort()
    }
}

fn decode<T: Pod>(buf: &[u8]) -> Result<Vec<T>, CommError> {
    let element_size = std::mem::size_of::<T>();
    if buf.len() % element_size != 0 {
        return Err(CommError::Truncated {
            len: buf.len(),
            element_size,
        });
    }
    Ok(buf
        .chunks_exact(element_size)
        .map(bytemuck::pod_read_unaligned)
        .collect())
}

/// Typed collectives built on top of [`Communicator::all_to_all_bytes`].
///
/// Reductions combine contributions in rank order on every rank, so all ranks obtain
/// bit-identical results. Iterative solvers rely on this to take the same branches everywhere.
pub trait CommExt: Communicator {
    fn all_to_all<T: Pod>(&self, send: Vec<Vec<T>>) -> Result<Vec<Vec<T>>, CommError> {
        let bytes = send
            .iter()
            .map(|values| bytemuck::cast_slice::<T, u8>(values).to_vec())
            .collect();
        self.all_to_all_bytes(bytes)?
            .iter()
            .map(|buf| decode::<T>(buf))
            .collect()
    }

    fn all_gather<T: Pod>(&self, local: &[T]) -> Result<Vec<Vec<T>>, CommError> {
        self.all_to_all(vec![local.to_vec(); self.size()])
    }

    fn all_reduce_sum_f64(&self, value: f64) -> Result<f64, CommError> {
        Ok(self.all_gather(&[value])?.iter().flatten().sum())
    }

    fn all_reduce_sum_usize(&self, value: usize) -> Result<usize, CommError> {
        let total: u64 = self.all_gather(&[value as u64])?.iter().flatten().sum();
        Ok(total as usize)
    }

    fn all_reduce_max_f64(&self, value: f64) -> Result<f64, CommError> {
        Ok(self
            .all_gather(&[value])?
            .iter()
            .flatten()
            .fold(f64::NEG_INFINITY, |max, &v| max.max(v)))
    }
}

impl<C: Communicator + ?Sized> CommExt for C {}

/// Group consisting of only the calling rank.
#[derive(Clone, Debug, Default)]
pub struct SelfComm;

impl Communicator for SelfComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn all_to_all_bytes(&self, send: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>, CommError> {
        if send.len() != 1 {
            return Err(CommError::WrongBufferCount {
                expected: 1,
                actual: send.len(),
            });
        }
        Ok(send)
    }

    fn abort(&self) {}
}

// (src, dst, sequence number of the collective)
type Key = (usize, usize, u64);

#[derive(Debug, Default)]
struct Mailbox {
    slots: DashMap<Key, Bytes>,
    aborted: AtomicBool,
}

/// One rank of an in-process rank group.
///
/// Each rank counts the collectives it has entered; since all ranks enter collectives in the
/// same order, the counter identifies matching messages without tags.
#[derive(Debug)]
pub struct ThreadComm {
    rank: usize,
    size: usize,
    mailbox: Arc<Mailbox>,
    sequence: AtomicU64,
}

impl ThreadComm {
    /// Creates the communicators of a group of `size` ranks, ordered by rank.
    pub fn group(size: usize) -> Vec<ThreadComm> {
        assert!(size > 0, "a rank group needs at least one rank");
        let mailbox = Arc::new(Mailbox::default());
        (0..size)
            .map(|rank| ThreadComm {
                rank,
                size,
                mailbox: Arc::clone(&mailbox),
                sequence: AtomicU64::new(0),
            })
            .collect()
    }

    fn is_aborted(&self) -> bool {
        self.mailbox.aborted.load(Ordering::SeqCst)
    }
}

impl Communicator for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn all_to_all_bytes(&self, send: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>, CommError> {
        if send.len() != self.size {
            return Err(CommError::WrongBufferCount {
                expected: self.size,
                actual: send.len(),
            });
        }
        if self.is_aborted() {
            return Err(CommError::Aborted { rank: self.rank });
        }

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let mut received = vec![Vec::new(); self.size];
        for (dst, buf) in send.into_iter().enumerate() {
            if dst == self.rank {
                received[dst] = buf;
            } else {
                self.mailbox
                    .slots
                    .insert((self.rank, dst, sequence), Bytes::from(buf));
            }
        }

        for src in (0..self.size).filter(|&src| src != self.rank) {
            let key = (src, self.rank, sequence);
            loop {
                if let Some((_, bytes)) = self.mailbox.slots.remove(&key) {
                    received[src] = bytes.to_vec();
                    break;
                }
                if self.is_aborted() {
                    return Err(CommError::Aborted { rank: self.rank });
                }
                std::thread::yield_now();
            }
        }

        Ok(received)
    }

    fn abort(&self) {
        log::error!("rank {} aborts the communicator group", self.rank);
        self.mailbox.aborted.store(true, Ordering::SeqCst);
    }
}

/// Runs `f` on every rank of a fresh in-process group of `size` ranks and returns the
/// per-rank results, ordered by rank.
///
/// A panic on one rank aborts the group, so the remaining ranks fail their next collective
/// instead of blocking; the panic is then propagated to the caller.
pub fn run_in_process<T, F>(size: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(ThreadComm) -> T + Sync,
{
    let comms = ThreadComm::group(size);
    let results: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                let f = &f;
                let mailbox = Arc::clone(&comm.mailbox);
                scope.spawn(move || {
                    let result = catch_unwind(AssertUnwindSafe(|| f(comm)));
                    if result.is_err() {
                        mailbox.aborted.store(true, Ordering::SeqCst);
                    }
                    result
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap_or_else(|payload| resume_unwind(payload)))
            .collect()
    });

    results
        .into_iter()
        .map(|result| result.unwrap_or_else(|payload| resume_unwind(payload)))
        .collect()
}

#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::Communicator;
    use crate::error::CommError;
    use mpi::datatype::{Partition, PartitionMut};
    use mpi::environment::Universe;
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::*;
    use mpi::Count;

    /// One rank per MPI process, spanning `MPI_COMM_WORLD`.
    pub struct MpiComm {
        world: SimpleCommunicator,
        // Finalizes MPI when dropped, so it must outlive `world`
        _universe: Universe,
    }

    impl MpiComm {
        /// Initializes MPI. Returns `None` if MPI has already been initialized.
        pub fn initialize() -> Option<Self> {
            let universe = mpi::initialize()?;
            let world = universe.world();
            Some(Self {
                world,
                _universe: universe,
            })
        }
    }

    fn displacements(counts: &[Count]) -> Vec<Count> {
        counts
            .iter()
            .scan(0, |offset, &count| {
                let displacement = *offset;
                *offset += count;
                Some(displacement)
            })
            .collect()
    }

    impl Communicator for MpiComm {
        fn rank(&self) -> usize {
            self.world.rank() as usize
        }

        fn size(&self) -> usize {
            self.world.size() as usize
        }

        fn all_to_all_bytes(&self, send: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>, CommError> {
            let size = self.size();
            if send.len() != size {
                return Err(CommError::WrongBufferCount {
                    expected: size,
                    actual: send.len(),
                });
            }

            let send_counts: Vec<Count> = send.iter().map(|buf| buf.len() as Count).collect();
            let mut recv_counts = vec![0 as Count; size];
            self.world
                .all_to_all_into(&send_counts[..], &mut recv_counts[..]);

            let send_displs = displacements(&send_counts);
            let recv_displs = displacements(&recv_counts);
            let flat: Vec<u8> = send.concat();
            let total: usize = recv_counts.iter().map(|&count| count as usize).sum();
            let mut recv_flat = vec![0u8; total];
            {
                let send_partition = Partition::new(&flat[..], &send_counts[..], &send_displs[..]);
                let mut recv_partition = PartitionMut::new(&mut recv_flat[..], &recv_counts[..], &recv_displs[..]);
                self.world
                    .all_to_all_varcount_into(&send_partition, &mut recv_partition);
            }

            Ok(recv_displs
                .iter()
                .zip(&recv_counts)
                .map(|(&displ, &count)| recv_flat[displ as usize..(displ + count) as usize].to_vec())
                .collect())
        }

        fn barrier(&self) -> Result<(), CommError> {
            self.world.barrier();
            Ok(())
        }

        fn abort(&self) {
            self.world.abort(1)
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;
