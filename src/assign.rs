// [[file:../intranode.note::*docs][docs:1]]
//! Collective discovery of node-local ranks.
//!
//! Every member sends its host key to the coordinator, which numbers the
//! distinct hosts in first-seen order of global rank and scatters each
//! member its node rank. The members then split the group by node rank,
//! keeping their global order, and their rank in the new group is their
//! local rank.
// docs:1 ends here

// [[file:../intranode.note::*imports][imports:1]]
use super::*;
use group::Group;
use key::{ColocationKey, HOST_KEY_LEN};
use resolver::NodeKeyResolver;

use std::collections::HashMap;
// imports:1 ends here

// [[file:../intranode.note::2b9e0c47][2b9e0c47]]
/// The rank that collects host keys and numbers the nodes.
pub const COORDINATOR: usize = 0;

/// How the members of a group are spread over nodes, as computed by the
/// coordinator from the gathered keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeLayout {
    node_ranks: Vec<usize>,
    local_ranks: Vec<usize>,
    node_sizes: Vec<usize>,
}

impl NodeLayout {
    /// Build the layout from host keys indexed by global rank.
    ///
    /// Nodes are numbered in the order their key first appears when
    /// scanning global ranks upwards; members of a node are numbered the
    /// same way.
    pub fn from_keys(keys: &[ColocationKey]) -> Self {
        let mut nodes: HashMap<&ColocationKey, usize> = HashMap::new();
        let mut node_ranks = Vec::with_capacity(keys.len());
        let mut local_ranks = Vec::with_capacity(keys.len());
        let mut node_sizes: Vec<usize> = vec![];
        for key in keys {
            let next = nodes.len();
            let node = *nodes.entry(key).or_insert(next);
            if node == node_sizes.len() {
                node_sizes.push(0);
            }
            local_ranks.push(node_sizes[node]);
            node_sizes[node] += 1;
            node_ranks.push(node);
        }

        Self {
            node_ranks,
            local_ranks,
            node_sizes,
        }
    }

    /// Node rank of each member, indexed by global rank.
    pub fn node_ranks(&self) -> &[usize] {
        &self.node_ranks
    }

    /// Local rank of each member, indexed by global rank.
    pub fn local_ranks(&self) -> &[usize] {
        &self.local_ranks
    }

    /// The number of distinct nodes.
    pub fn node_count(&self) -> usize {
        self.node_sizes.len()
    }

    /// The number of members on each node, indexed by node rank.
    pub fn node_sizes(&self) -> &[usize] {
        &self.node_sizes
    }
}
// 2b9e0c47 ends here

// [[file:../intranode.note::a4d7e1f6][a4d7e1f6]]
/// Assigns node-local ranks to the members of a group.
#[derive(Default)]
pub struct IntranodeRankAssigner {
    resolver: NodeKeyResolver,
}

impl IntranodeRankAssigner {
    /// Construct an assigner using `resolver` for host keys and launcher
    /// hints.
    pub fn new(resolver: NodeKeyResolver) -> Self {
        Self { resolver }
    }

    /// Gather host keys at the coordinator and scatter node ranks back.
    /// Collective over `group`.
    fn rendezvous<G: Group>(&self, group: &G) -> Result<usize> {
        let key = self.resolver.colocation_key()?;
        trace!("rank {} runs on {key}", group.rank());

        let gathered = group
            .gather(key.as_bytes(), COORDINATOR)
            .context("gather host keys")?;
        let node_ranks = match gathered {
            Some(buf) => {
                let size = group.size();
                if buf.len() != size * HOST_KEY_LEN {
                    bail!(
                        "gathered {} bytes of host keys from {size} members, expected {} bytes each",
                        buf.len(),
                        HOST_KEY_LEN
                    );
                }
                let keys = buf
                    .chunks_exact(HOST_KEY_LEN)
                    .map(ColocationKey::from_slot)
                    .collect::<Result<Vec<_>>>()?;
                let layout = NodeLayout::from_keys(&keys);
                debug!("{size} members found on {} nodes: {:?}", layout.node_count(), layout.node_sizes());
                trace!("local ranks: {:?}", layout.local_ranks());
                Some(layout.node_ranks().iter().map(|&r| r as u64).collect_vec())
            }
            None => None,
        };

        let node_rank = group
            .scatter(node_ranks.as_deref(), COORDINATOR)
            .context("scatter node ranks")?;
        Ok(node_rank as usize)
    }
}
// a4d7e1f6 ends here

// [[file:../intranode.note::5e0c8b13][5e0c8b13]]
impl IntranodeRankAssigner {
    /// Return the rank of the node the calling member runs on. Members on
    /// the same node get the same value; distinct nodes get distinct
    /// values. Collective over `group` unless the launcher already told.
    pub fn node_rank<G: Group>(&self, group: &G) -> Result<usize> {
        if let Some(node_rank) = self.resolver.resolve_fast_path(group)? {
            debug!("node rank {node_rank} provided by launcher");
            return Ok(node_rank);
        }
        self.rendezvous(group)
    }

    /// Create a new group holding the members on the same node as the
    /// caller, ordered by their rank in `group`. Collective over `group`.
    pub fn create_intranode_group<G: Group>(&self, group: &G) -> Result<G> {
        let (_, local) = self.node_rank_and_group(group)?;
        Ok(local)
    }

    /// Same as `create_intranode_group`, also returning the node rank used
    /// to split `group`. Runs a single rendezvous.
    pub fn node_rank_and_group<G: Group>(&self, group: &G) -> Result<(usize, G)> {
        let node_rank = self.node_rank(group)?;
        let local = group
            .split(node_rank, group.rank())
            .with_context(|| format!("split group for node {node_rank}"))?;
        Ok((node_rank, local))
    }

    /// Return the position of the caller among the members of `group` on
    /// the same node.
    pub fn local_rank<G: Group>(&self, group: &G) -> Result<usize> {
        if let Some(local_rank) = self.resolver.local_rank_hint(group)? {
            debug!("local rank {local_rank} provided by launcher");
            return Ok(local_rank);
        }
        let local = self.create_intranode_group(group)?;
        Ok(local.rank())
    }

    /// Return the local rank of the caller together with its node-local
    /// group. Collective over `group`.
    pub fn compute_local_rank_and_subcomm<G: Group>(&self, group: &G) -> Result<(usize, G)> {
        let local = self.create_intranode_group(group)?;
        Ok((local.rank(), local))
    }
}
// 5e0c8b13 ends here

// [[file:../intranode.note::61f4d2c8][61f4d2c8]]
/// Return the node-local rank of the calling process in `group`, using
/// launcher hints from the environment and the system host name.
pub fn local_rank<G: Group>(group: &G) -> Result<usize> {
    IntranodeRankAssigner::default().local_rank(group)
}

/// Create the group of processes in `group` sharing the caller's node.
pub fn create_intranode_group<G: Group>(group: &G) -> Result<G> {
    IntranodeRankAssigner::default().create_intranode_group(group)
}

/// Return the node-local rank of the caller and its node-local group.
pub fn compute_local_rank_and_subcomm<G: Group>(group: &G) -> Result<(usize, G)> {
    IntranodeRankAssigner::default().compute_local_rank_and_subcomm(group)
}
// 61f4d2c8 ends here

// [[file:../intranode.note::d0a91b6e][d0a91b6e]]
#[cfg(test)]
use crate::cli::{simulate_member, RankReport};
#[cfg(test)]
use crate::launcher::LauncherEnv;
#[cfg(test)]
use crate::local::LocalGroup;

/// Run the full protocol with one simulated member per entry of `hosts`,
/// and check every node-local group holds exactly the members on its host.
/// Returns (node rank, local rank, members on node) per member.
#[cfg(test)]
fn simulate(hosts: &[&str]) -> Vec<(usize, usize, usize)> {
    let reports = LocalGroup::run(hosts.len(), |g| {
        let host = hosts[g.rank()];
        simulate_member(g, host).unwrap()
    })
    .unwrap();
    assert_node_partition(hosts, &reports);

    reports
        .iter()
        .map(|r| (r.node_rank, r.local_rank, r.node_size))
        .collect()
}

#[cfg(test)]
fn assert_node_partition(hosts: &[&str], reports: &[RankReport]) {
    let n = hosts.len();
    for r in reports {
        // same host, ascending global rank
        let expected = (0..n).filter(|&i| hosts[i] == hosts[r.global_rank]).collect_vec();
        assert_eq!(r.node_members, expected, "members seen by rank {}", r.global_rank);
        assert_eq!(r.node_members[r.local_rank], r.global_rank);
        assert_eq!(r.node_members.len(), r.node_size);
    }

    // every rank shows up in exactly one group
    let mut all = reports
        .iter()
        .map(|r| r.node_members.clone())
        .unique()
        .flatten()
        .collect_vec();
    all.sort();
    assert_eq!(all, (0..n).collect_vec());
}

/// A group on which any collective call is a failure.
#[cfg(test)]
struct NoCollectives;

#[cfg(test)]
impl Group for NoCollectives {
    fn size(&self) -> usize {
        4
    }
    fn rank(&self) -> usize {
        3
    }
    fn is_world(&self) -> bool {
        true
    }
    fn gather(&self, _send: &[u8], _root: usize) -> Result<Option<Vec<u8>>> {
        panic!("gather issued");
    }
    fn scatter(&self, _send: Option<&[u64]>, _root: usize) -> Result<u64> {
        panic!("scatter issued");
    }
    fn split(&self, _color: usize, _key: usize) -> Result<Self> {
        panic!("split issued");
    }
    fn barrier(&self) -> Result<()> {
        panic!("barrier issued");
    }
}

#[test]
fn test_node_layout() {
    let keys = ["h1", "h2", "h1", "h3", "h2", "h1"].map(ColocationKey::from);
    let layout = NodeLayout::from_keys(&keys);
    assert_eq!(layout.node_ranks(), &[0, 1, 0, 2, 1, 0]);
    assert_eq!(layout.local_ranks(), &[0, 0, 1, 0, 1, 2]);
    assert_eq!(layout.node_sizes(), &[3, 2, 1]);
    assert_eq!(layout.node_count(), 3);

    let layout = NodeLayout::from_keys(&[]);
    assert_eq!(layout.node_count(), 0);
}

#[test]
fn test_two_nodes_in_blocks() {
    let out = simulate(&["h1", "h1", "h2", "h2"]);
    assert_eq!(out, vec![(0, 0, 2), (0, 1, 2), (1, 0, 2), (1, 1, 2)]);
}

#[test]
fn test_two_nodes_round_robin() {
    let out = simulate(&["h1", "h2", "h1", "h2", "h1", "h2"]);
    let node_ranks = out.iter().map(|x| x.0).collect_vec();
    let local_ranks = out.iter().map(|x| x.1).collect_vec();
    assert_eq!(node_ranks, vec![0, 1, 0, 1, 0, 1]);
    assert_eq!(local_ranks, vec![0, 0, 1, 1, 2, 2]);
}

#[test]
fn test_uneven_nodes() {
    // node sizes 1, 3, 2: the split color must be the node, not the local index
    let out = simulate(&["a", "b", "b", "c", "b", "c"]);
    assert_eq!(out, vec![(0, 0, 1), (1, 0, 3), (1, 1, 3), (2, 0, 2), (1, 2, 3), (2, 1, 2)]);
}

#[test]
fn test_node_groups_membership() {
    // same group sizes and local ranks as a wrong pairing {0, 3} and {1, 2}
    let hosts = ["a", "b", "a", "b"];
    let reports = LocalGroup::run(hosts.len(), |g| {
        let host = hosts[g.rank()];
        simulate_member(g, host).unwrap()
    })
    .unwrap();
    let members = reports.iter().map(|r| r.node_members.clone()).collect_vec();
    assert_eq!(members, vec![vec![0, 2], vec![1, 3], vec![0, 2], vec![1, 3]]);

    let hosts = ["a", "b", "b", "c", "b", "c", "a"];
    let reports = LocalGroup::run(hosts.len(), |g| {
        let host = hosts[g.rank()];
        simulate_member(g, host).unwrap()
    })
    .unwrap();
    assert_node_partition(&hosts, &reports);
    assert_eq!(reports[4].node_members, vec![1, 2, 4]);
    assert_eq!(reports[5].node_members, vec![3, 5]);
}

#[test]
fn test_single_process() {
    let out = simulate(&["lonely"]);
    assert_eq!(out, vec![(0, 0, 1)]);
}

#[test]
fn test_launcher_local_rank() {
    let env = LauncherEnv::from_vars([("OMPI_COMM_WORLD_LOCAL_RANK", "2")]);
    let assigner = IntranodeRankAssigner::new(NodeKeyResolver::new(env).with_host("h1"));
    assert_eq!(assigner.local_rank(&NoCollectives).unwrap(), 2);

    let env = LauncherEnv::from_vars([("OMPI_COMM_WORLD_NODE_RANK", "5")]);
    let assigner = IntranodeRankAssigner::new(NodeKeyResolver::new(env).with_host("h1"));
    assert_eq!(assigner.node_rank(&NoCollectives).unwrap(), 5);

    let env = LauncherEnv::from_vars([("OMPI_COMM_WORLD_LOCAL_RANK", "-2")]);
    let assigner = IntranodeRankAssigner::new(NodeKeyResolver::new(env).with_host("h1"));
    assert!(assigner.local_rank(&NoCollectives).is_err());
}

#[test]
fn test_launcher_node_rank_splits_world() {
    // every member claims node 0 through the launcher, regardless of host
    let out = LocalGroup::run(3, |g| {
        let env = LauncherEnv::from_vars([("OMPI_COMM_WORLD_NODE_RANK", "0")]);
        let host = format!("h{}", g.rank());
        let assigner = IntranodeRankAssigner::new(NodeKeyResolver::new(env).with_host(host));
        let (local_rank, local) = assigner.compute_local_rank_and_subcomm(&g).unwrap();
        (local_rank, local.size())
    })
    .unwrap();
    assert_eq!(out, vec![(0, 3), (1, 3), (2, 3)]);
}

#[test]
fn test_random_topologies() {
    use rand::{Rng, SeedableRng};

    let mut rng = rand::rngs::StdRng::seed_from_u64(42);
    for _ in 0..20 {
        let n = rng.gen_range(1..=12);
        let nhosts = rng.gen_range(1..=4);
        let hosts = (0..n).map(|_| format!("node{}", rng.gen_range(0..nhosts))).collect_vec();
        let hosts = hosts.iter().map(|h| h.as_str()).collect_vec();

        let out = simulate(&hosts);
        // unchanged input, unchanged answer
        assert_eq!(out, simulate(&hosts));

        let keys = hosts.iter().map(|&h| ColocationKey::from(h)).collect_vec();
        let layout = NodeLayout::from_keys(&keys);
        for (rank, &(node_rank, local_rank, node_size)) in out.iter().enumerate() {
            assert_eq!(node_rank, layout.node_ranks()[rank]);
            assert_eq!(local_rank, layout.local_ranks()[rank]);
            assert_eq!(node_size, layout.node_sizes()[node_rank]);
        }

        // local ranks on every host are exactly 0..k
        for host in hosts.iter().unique() {
            let mut locals = (0..n).filter(|&r| hosts[r] == *host).map(|r| out[r].1).collect_vec();
            locals.sort();
            assert_eq!(locals, (0..locals.len()).collect_vec());
        }
        assert_eq!(layout.node_sizes().iter().sum::<usize>(), n);
    }
}
// d0a91b6e ends here
