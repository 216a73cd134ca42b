// [[file:../intranode.note::dba9de5e][dba9de5e]]
//! Node-local rank discovery for processes of a parallel job.
//!
//! Processes of an MPI job are spread over an unknown number of hosts. The
//! local rank of a process is its 0-based position among the processes on
//! the same host, which is handy for picking one process per node or for
//! binding processes to local devices.
//!
//! # Example
//!
//! ```ignore
//! use gosh_intranode::{local_rank, MpiGroup};
//!
//! let universe = mpi::initialize().unwrap();
//! let world = MpiGroup::world(&universe);
//! let rank = local_rank(&world)?;
//! ```
// dba9de5e ends here

// [[file:../intranode.note::963f5eb8][963f5eb8]]
use gosh_core::*;
use gut::prelude::*;
// 963f5eb8 ends here

// [[file:../intranode.note::b21b77b4][b21b77b4]]
mod assign;
mod group;
mod key;
mod local;
mod resolver;

#[cfg(feature = "mpi")]
mod mpi_group;

pub mod cli;
pub mod launcher;

mod common {
    pub use gosh_core::gut::prelude::*;
    pub use gosh_core::*;
}
// b21b77b4 ends here

// [[file:../intranode.note::5c33a18a][5c33a18a]]
/// Return system host name as raw bytes
fn hostname_bytes() -> Result<Vec<u8>> {
    use std::os::unix::ffi::OsStrExt;

    let name = nix::unistd::gethostname().context("gethostname")?;
    Ok(name.as_bytes().to_vec())
}

/// Return system host name
pub fn hostname() -> Result<String> {
    let bytes = hostname_bytes()?;
    let name = String::from_utf8(bytes).context("host name is not valid utf-8")?;
    Ok(name)
}

#[test]
fn test_hostname() {
    let name = hostname().unwrap();
    assert!(!name.is_empty());
}
// 5c33a18a ends here

// [[file:../intranode.note::0a725e9c][0a725e9c]]
pub use assign::{compute_local_rank_and_subcomm, create_intranode_group, local_rank};
pub use assign::{IntranodeRankAssigner, NodeLayout, COORDINATOR};
pub use group::Group;
pub use key::{ColocationKey, HOST_KEY_LEN};
pub use local::{LocalGroup, DEFAULT_RECV_TIMEOUT};
pub use resolver::NodeKeyResolver;

#[cfg(feature = "mpi")]
pub use mpi_group::MpiGroup;
// 0a725e9c ends here

// [[file:../intranode.note::56d334b5][56d334b5]]
#[cfg(feature = "adhoc")]
/// Docs for local mods
pub mod docs {
    macro_rules! export_doc {
        ($l:ident) => {
            pub mod $l {
                pub use crate::$l::*;
            }
        };
    }

    export_doc!(assign);
    export_doc!(key);
    export_doc!(local);
    export_doc!(resolver);
}
// 56d334b5 ends here
