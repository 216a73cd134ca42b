// [[file:../intranode.note::*imports][imports:1]]
use super::*;
use group::Group;
use key::ColocationKey;
use launcher::{LauncherEnv, RankHint, RankKind};
// imports:1 ends here

// [[file:../intranode.note::f3a8c21d][f3a8c21d]]
/// Resolves where the calling process runs: its colocation key, and the
/// node placement its launcher may already have decided.
pub struct NodeKeyResolver {
    hint: Box<dyn RankHint + Send + Sync>,
    // stands in for the system host name when set
    host: Option<String>,
}

impl Default for NodeKeyResolver {
    fn default() -> Self {
        Self::new(LauncherEnv::from_process())
    }
}

impl NodeKeyResolver {
    /// Construct a resolver consulting `hint` for launcher fast paths.
    pub fn new(hint: impl RankHint + Send + Sync + 'static) -> Self {
        Self {
            hint: Box::new(hint),
            host: None,
        }
    }

    /// Use `host` as host identifier instead of the system host name.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }
}
// f3a8c21d ends here

// [[file:../intranode.note::0d6e7b94][0d6e7b94]]
impl NodeKeyResolver {
    /// Return the launcher-assigned node rank when `group` is the world
    /// group. None means the node rank has to be discovered collectively.
    pub fn resolve_fast_path<G: Group>(&self, group: &G) -> Result<Option<usize>> {
        self.world_hint(group, RankKind::NodeRank)
    }

    /// Return the launcher-assigned local rank when `group` is the world
    /// group.
    pub fn local_rank_hint<G: Group>(&self, group: &G) -> Result<Option<usize>> {
        self.world_hint(group, RankKind::LocalRank)
    }

    fn world_hint<G: Group>(&self, group: &G, kind: RankKind) -> Result<Option<usize>> {
        // launcher variables only describe the world group
        if !group.is_world() {
            return Ok(None);
        }
        self.hint.predetermined_rank(kind)
    }

    /// Return the colocation key of the calling process.
    pub fn colocation_key(&self) -> Result<ColocationKey> {
        let key = match &self.host {
            Some(host) => ColocationKey::from(host.as_str()),
            None => ColocationKey::from_bytes(&hostname_bytes()?),
        };
        if key.is_blank() {
            bail!("empty host name: cannot tell which node this process runs on");
        }
        Ok(key)
    }
}
// 0d6e7b94 ends here

// [[file:../intranode.note::7c19e5a0][7c19e5a0]]
#[test]
fn test_node_key_resolver() {
    use crate::local::LocalGroup;

    let env = LauncherEnv::from_vars([("OMPI_COMM_WORLD_NODE_RANK", "1"), ("MPI_LOCALRANKID", "2")]);
    let resolver = NodeKeyResolver::new(env).with_host("node07");
    assert_eq!(resolver.colocation_key().unwrap().to_string(), "node07");

    let out = LocalGroup::run(2, |g| {
        let world = (resolver.resolve_fast_path(&g).unwrap(), resolver.local_rank_hint(&g).unwrap());
        let sub = g.split(0, g.rank()).unwrap();
        let other = (resolver.resolve_fast_path(&sub).unwrap(), resolver.local_rank_hint(&sub).unwrap());
        (world, other)
    })
    .unwrap();
    for (world, other) in out {
        assert_eq!(world, (Some(1), Some(2)));
        assert_eq!(other, (None, None));
    }

    let resolver = NodeKeyResolver::new(launcher::NoHint).with_host("");
    assert!(resolver.colocation_key().is_err());

    // the system host name is usable as a key
    let resolver = NodeKeyResolver::new(launcher::NoHint);
    assert!(!resolver.colocation_key().unwrap().is_blank());
}
// 7c19e5a0 ends here
