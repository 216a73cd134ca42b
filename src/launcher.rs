// [[file:../intranode.note::*imports][imports:1]]
use super::*;

use std::collections::HashMap;
// imports:1 ends here

// [[file:../intranode.note::5a0f93ce][5a0f93ce]]
/// The kinds of placement information an MPI launcher may export to its
/// processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RankKind {
    /// Position among processes on the same node
    LocalRank,
    /// Which node the process runs on, relative to the job
    ///
    /// Taken as is to split the world group, host names are not consulted.
    /// A launcher exporting something else than a node id under this name
    /// (e.g. a per-process index) mis-groups processes.
    NodeRank,
    /// Rank in the world communicator
    GlobalRank,
    /// Number of processes on the same node
    LocalSize,
    /// Number of processes in the world communicator
    GlobalSize,
}

impl RankKind {
    /// Environment variables carrying this value, in lookup order.
    pub fn env_vars(&self) -> &'static [&'static str] {
        match self {
            // OpenMPI, MVAPICH, Intel MPI/MPICH
            Self::LocalRank => &["OMPI_COMM_WORLD_LOCAL_RANK", "MV2_COMM_WORLD_LOCAL_RANK", "MPI_LOCALRANKID"],
            // OpenMPI
            Self::NodeRank => &["OMPI_COMM_WORLD_NODE_RANK"],
            Self::GlobalRank => &["OMPI_COMM_WORLD_RANK", "MV2_COMM_WORLD_RANK", "PMI_RANK"],
            Self::LocalSize => &["OMPI_COMM_WORLD_LOCAL_SIZE", "MV2_COMM_WORLD_LOCAL_SIZE", "MPI_LOCALNRANKS"],
            Self::GlobalSize => &["OMPI_COMM_WORLD_SIZE", "MV2_COMM_WORLD_SIZE", "PMI_SIZE"],
        }
    }
}
// 5a0f93ce ends here

// [[file:../intranode.note::e2c4b8a6][e2c4b8a6]]
/// Source of ranks the launcher may have already assigned.
pub trait RankHint {
    /// Return the predetermined value of `kind`, or None if the launcher
    /// did not provide one. A provided but malformed value is an error.
    fn predetermined_rank(&self, kind: RankKind) -> Result<Option<usize>>;
}

/// Never provides a hint, so the full discovery protocol always runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHint;

impl RankHint for NoHint {
    fn predetermined_rank(&self, _kind: RankKind) -> Result<Option<usize>> {
        Ok(None)
    }
}
// e2c4b8a6 ends here

// [[file:../intranode.note::71d3fa08][71d3fa08]]
/// Rank hints read from launcher environment variables.
#[derive(Debug, Clone, Default)]
pub struct LauncherEnv {
    // captured variables; None for the live process environment
    vars: Option<HashMap<String, String>>,
}

impl LauncherEnv {
    /// Read hints from the environment of the current process.
    pub fn from_process() -> Self {
        Self { vars: None }
    }

    /// Read hints from a fixed set of variables instead of the process
    /// environment.
    pub fn from_vars<K, V>(vars: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let vars = vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        Self { vars: Some(vars) }
    }

    fn var(&self, name: &str) -> Option<String> {
        match &self.vars {
            Some(vars) => vars.get(name).cloned(),
            None => std::env::var(name).ok(),
        }
    }
}

impl RankHint for LauncherEnv {
    fn predetermined_rank(&self, kind: RankKind) -> Result<Option<usize>> {
        for name in kind.env_vars() {
            if let Some(v) = self.var(name) {
                let rank = v
                    .trim()
                    .parse::<usize>()
                    .with_context(|| format!("invalid value {v:?} in launcher variable {name}"))?;
                trace!("{kind:?} = {rank} from {name}");
                return Ok(Some(rank));
            }
        }
        Ok(None)
    }
}
// 71d3fa08 ends here

// [[file:../intranode.note::ae1f2b04][ae1f2b04]]
/// Return MPI local rank ID
pub fn get_local_rank_id() -> Result<Option<usize>> {
    LauncherEnv::from_process().predetermined_rank(RankKind::LocalRank)
}

/// Return the node rank ID assigned by the launcher
pub fn get_node_rank_id() -> Result<Option<usize>> {
    LauncherEnv::from_process().predetermined_rank(RankKind::NodeRank)
}

/// Return MPI global rank ID
pub fn get_global_rank_id() -> Result<Option<usize>> {
    LauncherEnv::from_process().predetermined_rank(RankKind::GlobalRank)
}

/// Return MPI local number of ranks
pub fn get_local_number_of_ranks() -> Result<Option<usize>> {
    LauncherEnv::from_process().predetermined_rank(RankKind::LocalSize)
}

/// Return MPI global number of ranks
pub fn get_global_number_of_ranks() -> Result<Option<usize>> {
    LauncherEnv::from_process().predetermined_rank(RankKind::GlobalSize)
}
// ae1f2b04 ends here

// [[file:../intranode.note::c8a05d62][c8a05d62]]
#[test]
fn test_launcher_env() {
    let env = LauncherEnv::from_vars([("OMPI_COMM_WORLD_LOCAL_RANK", "3"), ("OMPI_COMM_WORLD_SIZE", " 16 ")]);
    assert_eq!(env.predetermined_rank(RankKind::LocalRank).unwrap(), Some(3));
    assert_eq!(env.predetermined_rank(RankKind::GlobalSize).unwrap(), Some(16));
    assert_eq!(env.predetermined_rank(RankKind::NodeRank).unwrap(), None);

    // Open MPI variables take precedence
    let env = LauncherEnv::from_vars([("MPI_LOCALRANKID", "1"), ("OMPI_COMM_WORLD_LOCAL_RANK", "0")]);
    assert_eq!(env.predetermined_rank(RankKind::LocalRank).unwrap(), Some(0));
    let env = LauncherEnv::from_vars([("MPI_LOCALRANKID", "5")]);
    assert_eq!(env.predetermined_rank(RankKind::LocalRank).unwrap(), Some(5));

    let env = LauncherEnv::from_vars([("MV2_COMM_WORLD_LOCAL_RANK", "-1")]);
    assert!(env.predetermined_rank(RankKind::LocalRank).is_err());
    let env = LauncherEnv::from_vars([("OMPI_COMM_WORLD_NODE_RANK", "two")]);
    assert!(env.predetermined_rank(RankKind::NodeRank).is_err());

    assert_eq!(NoHint.predetermined_rank(RankKind::LocalRank).unwrap(), None);
}
// c8a05d62 ends here
