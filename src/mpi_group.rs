// [[file:../intranode.note::*docs][docs:1]]
//! `Group` backed by an MPI communicator (rsmpi).
// docs:1 ends here

// [[file:../intranode.note::*imports][imports:1]]
use super::*;
use group::Group;

use ::mpi::environment::Universe;
use ::mpi::topology::{Color, SimpleCommunicator};
use ::mpi::traits::*;
// imports:1 ends here

// [[file:../intranode.note::c5b3e08f][c5b3e08f]]
/// An MPI communicator usable by the rank discovery protocol.
pub struct MpiGroup {
    comm: SimpleCommunicator,
    world: bool,
}

impl MpiGroup {
    /// The world communicator of an initialized MPI `universe`.
    pub fn world(universe: &Universe) -> Self {
        Self {
            comm: universe.world(),
            world: true,
        }
    }

    /// The underlying communicator.
    pub fn communicator(&self) -> &SimpleCommunicator {
        &self.comm
    }
}

impl MpiGroup {
    /// Abort the whole job: peers already waiting in the collective could
    /// never leave it otherwise.
    fn abort(&self, err: Error) -> ! {
        error!("rank {} aborts MPI job: {err:?}", self.rank());
        self.comm.abort(1)
    }
}

fn to_mpi_int(x: usize, what: &str) -> Result<i32> {
    i32::try_from(x).with_context(|| format!("{what} {x} does not fit into an MPI int"))
}
// c5b3e08f ends here

// [[file:../intranode.note::e7812a3b][e7812a3b]]
impl Group for MpiGroup {
    fn size(&self) -> usize {
        self.comm.size() as usize
    }

    fn rank(&self) -> usize {
        self.comm.rank() as usize
    }

    fn is_world(&self) -> bool {
        self.world
    }

    fn gather(&self, send: &[u8], root: usize) -> Result<Option<Vec<u8>>> {
        let root_process = self.comm.process_at_rank(to_mpi_int(root, "root")?);
        // lengths go first, so the root can refuse a mismatch before
        // receiving any payload
        let len = send.len() as u64;
        if self.rank() == root {
            let mut lengths = vec![0u64; self.size()];
            root_process.gather_into_root(&len, &mut lengths[..]);
            if let Err(err) = group::check_gather_lengths(&lengths, send.len()) {
                self.abort(err);
            }
            let mut buf = vec![0u8; send.len() * self.size()];
            root_process.gather_into_root(send, &mut buf[..]);
            Ok(Some(buf))
        } else {
            root_process.gather_into(&len);
            root_process.gather_into(send);
            Ok(None)
        }
    }

    fn scatter(&self, send: Option<&[u64]>, root: usize) -> Result<u64> {
        let root_process = self.comm.process_at_rank(to_mpi_int(root, "root")?);
        let mut recv = 0u64;
        if self.rank() == root {
            let send = match group::check_scatter_send(send, self.size()) {
                Ok(send) => send,
                Err(err) => self.abort(err),
            };
            root_process.scatter_into_root(send, &mut recv);
        } else {
            root_process.scatter_into(&mut recv);
        }
        Ok(recv)
    }

    fn split(&self, color: usize, key: usize) -> Result<Self> {
        let color = Color::with_value(to_mpi_int(color, "split color")?);
        let key = to_mpi_int(key, "split key")?;
        let comm = self
            .comm
            .split_by_color_with_key(color, key)
            .ok_or_else(|| format_err!("MPI_Comm_split returned no communicator"))?;
        Ok(Self { comm, world: false })
    }

    fn barrier(&self) -> Result<()> {
        self.comm.barrier();
        Ok(())
    }
}
// e7812a3b ends here
