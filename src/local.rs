// [[file:../intranode.note::*docs][docs:1]]
//! An in-process group whose members are threads of the same process.
//!
//! Every ordered pair of members is linked by its own channel, so messages
//! between two members never overtake each other. Collectives are built
//! from these links: the root of a gather receives from each member in
//! rank order, the root of a scatter sends to each member in rank order.
// docs:1 ends here

// [[file:../intranode.note::*imports][imports:1]]
use super::*;
use group::Group;

use crossbeam_channel::{unbounded, Receiver, Sender};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
// imports:1 ends here

// [[file:../intranode.note::4f02c6e9][4f02c6e9]]
/// How long a member waits for a message from a peer before giving up.
pub const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_secs(60);

enum Packet {
    Bytes(Vec<u8>),
    Word(u64),
    Join(LocalGroup),
}

struct Link {
    tx: Sender<Packet>,
    rx: Receiver<Packet>,
}

/// Channels between all members of one group.
struct Fabric {
    // indexed as [src][dst]
    links: Vec<Vec<Link>>,
    timeout: Duration,
}

impl Fabric {
    fn new(n: usize, timeout: Duration) -> Arc<Self> {
        let links = (0..n)
            .map(|_| {
                (0..n)
                    .map(|_| {
                        let (tx, rx) = unbounded();
                        Link { tx, rx }
                    })
                    .collect()
            })
            .collect();
        Arc::new(Self { links, timeout })
    }

    fn size(&self) -> usize {
        self.links.len()
    }
}
// 4f02c6e9 ends here

// [[file:../intranode.note::b71e3c58][b71e3c58]]
/// One member of an in-process group.
pub struct LocalGroup {
    rank: usize,
    world: bool,
    fabric: Arc<Fabric>,
}

impl std::fmt::Debug for LocalGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalGroup")
            .field("rank", &self.rank)
            .field("size", &self.fabric.size())
            .field("world", &self.world)
            .finish()
    }
}

impl LocalGroup {
    /// Create the `n` members of a new world group. Each member is meant
    /// to be moved into its own thread.
    pub fn world(n: usize) -> Vec<Self> {
        Self::world_with_timeout(n, DEFAULT_RECV_TIMEOUT)
    }

    /// Same as `world`, but receives time out after `timeout`.
    pub fn world_with_timeout(n: usize, timeout: Duration) -> Vec<Self> {
        Self::members(Fabric::new(n, timeout), true)
    }

    fn members(fabric: Arc<Fabric>, world: bool) -> Vec<Self> {
        (0..fabric.size())
            .map(|rank| Self {
                rank,
                world,
                fabric: fabric.clone(),
            })
            .collect()
    }

    /// Run `f` for every member of a new world group of `n` members, each
    /// on its own thread. Returns the results in rank order.
    pub fn run<R, F>(n: usize, f: F) -> Result<Vec<R>>
    where
        F: Fn(LocalGroup) -> R + Sync,
        R: Send,
    {
        let f = &f;
        std::thread::scope(|s| {
            let handles = Self::world(n)
                .into_iter()
                .map(|member| s.spawn(move || f(member)))
                .collect_vec();
            handles
                .into_iter()
                .enumerate()
                .map(|(rank, h)| h.join().map_err(|_| format_err!("member {rank} panicked")))
                .collect()
        })
    }
}
// b71e3c58 ends here

// [[file:../intranode.note::20d8fa47][20d8fa47]]
impl LocalGroup {
    fn send(&self, dst: usize, packet: Packet) -> Result<()> {
        let rank = self.rank;
        self.fabric.links[rank][dst]
            .tx
            .send(packet)
            .map_err(|_| format_err!("link from rank {rank} to rank {dst} closed"))
    }

    fn recv(&self, src: usize) -> Result<Packet> {
        let rank = self.rank;
        self.fabric.links[src][rank]
            .rx
            .recv_timeout(self.fabric.timeout)
            .with_context(|| format!("rank {rank} waiting for a message from rank {src}"))
    }

    fn check_root(&self, root: usize) -> Result<()> {
        if root >= self.size() {
            bail!("root {root} out of range for a group of {} members", self.size());
        }
        Ok(())
    }
}

impl Group for LocalGroup {
    fn size(&self) -> usize {
        self.fabric.size()
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn is_world(&self) -> bool {
        self.world
    }

    fn gather(&self, send: &[u8], root: usize) -> Result<Option<Vec<u8>>> {
        self.check_root(root)?;
        if self.rank != root {
            self.send(root, Packet::Bytes(send.to_vec()))?;
            return Ok(None);
        }

        let mut chunks = Vec::with_capacity(self.size());
        for src in 0..self.size() {
            if src == root {
                chunks.push(send.to_vec());
                continue;
            }
            match self.recv(src)? {
                Packet::Bytes(chunk) => chunks.push(chunk),
                _ => bail!("gather: unexpected message kind from rank {src}"),
            }
        }
        let lengths = chunks.iter().map(|c| c.len() as u64).collect_vec();
        group::check_gather_lengths(&lengths, send.len())?;
        let buf = chunks.concat();
        Ok(Some(buf))
    }

    fn scatter(&self, send: Option<&[u64]>, root: usize) -> Result<u64> {
        self.check_root(root)?;
        if self.rank != root {
            return match self.recv(root)? {
                Packet::Word(v) => Ok(v),
                _ => bail!("scatter: unexpected message kind from rank {root}"),
            };
        }

        let send = group::check_scatter_send(send, self.size())?;
        for (dst, &v) in send.iter().enumerate().filter(|&(dst, _)| dst != root) {
            self.send(dst, Packet::Word(v))?;
        }
        Ok(send[root])
    }

    fn split(&self, color: usize, key: usize) -> Result<Self> {
        // member 0 builds the new groups and hands them out
        let mut entry = [0u8; 16];
        entry[..8].copy_from_slice(&(color as u64).to_le_bytes());
        entry[8..].copy_from_slice(&(key as u64).to_le_bytes());

        let all = match self.gather(&entry, 0)? {
            Some(all) => all,
            None => {
                return match self.recv(0)? {
                    Packet::Join(group) => Ok(group),
                    _ => bail!("split: unexpected message kind from rank 0"),
                };
            }
        };

        let mut colors: BTreeMap<u64, Vec<(u64, usize)>> = BTreeMap::new();
        for (rank, e) in all.chunks_exact(16).enumerate() {
            let c = u64::from_le_bytes(e[..8].try_into()?);
            let k = u64::from_le_bytes(e[8..].try_into()?);
            colors.entry(c).or_default().push((k, rank));
        }

        let mut mine = None;
        for (c, mut members) in colors {
            // ties on key are broken by parent rank
            members.sort();
            trace!("split color {c}: {} members", members.len());
            let fabric = Fabric::new(members.len(), self.fabric.timeout);
            for ((_, parent), group) in members.into_iter().zip(Self::members(fabric, false)) {
                if parent == self.rank {
                    mine = Some(group);
                } else {
                    self.send(parent, Packet::Join(group))?;
                }
            }
        }
        mine.ok_or_else(|| format_err!("split: rank {} missing from its own color", self.rank))
    }

    fn barrier(&self) -> Result<()> {
        self.gather(&[], 0)?;
        let zeros = (self.rank == 0).then(|| vec![0; self.size()]);
        self.scatter(zeros.as_deref(), 0)?;
        Ok(())
    }
}
// 20d8fa47 ends here

// [[file:../intranode.note::8e55a3d0][8e55a3d0]]
#[test]
fn test_local_gather_scatter() {
    let out = LocalGroup::run(4, |g| {
        let rank = g.rank();
        let gathered = g.gather(&[rank as u8, 7], 1).unwrap();
        let values = gathered.as_ref().map(|buf| buf.chunks(2).map(|c| c[0] as u64 * 10).collect_vec());
        let v = g.scatter(values.as_deref(), 1).unwrap();
        (gathered, v)
    })
    .unwrap();

    assert_eq!(out[1].0, Some(vec![0, 7, 1, 7, 2, 7, 3, 7]));
    assert!(out[0].0.is_none());
    let scattered = out.iter().map(|(_, v)| *v).collect_vec();
    assert_eq!(scattered, vec![0, 10, 20, 30]);
}

#[test]
fn test_local_split() {
    // members 0, 2, 3 pick color 5, member 1 picks color 9; keys reverse the order
    let out = LocalGroup::run(4, |g| {
        let color = if g.rank() == 1 { 9 } else { 5 };
        let sub = g.split(color, 10 - g.rank()).unwrap();
        sub.barrier().unwrap();
        (g.is_world(), sub.is_world(), sub.size(), sub.rank())
    })
    .unwrap();

    assert!(out.iter().all(|&(world, sub_world, _, _)| world && !sub_world));
    let layout = out.iter().map(|&(_, _, size, rank)| (size, rank)).collect_vec();
    assert_eq!(layout, vec![(3, 2), (1, 0), (3, 1), (3, 0)]);
}

#[test]
fn test_local_gather_length_mismatch() {
    let members = LocalGroup::world_with_timeout(2, Duration::from_millis(200));
    let out = std::thread::scope(|s| {
        let handles = members
            .into_iter()
            .map(|g| s.spawn(move || g.gather(&vec![1u8; 3 + g.rank()], 0).map(|x| x.is_some())))
            .collect_vec();
        handles.into_iter().map(|h| h.join().unwrap()).collect_vec()
    });
    assert!(out[0].is_err());
    assert_eq!(out[1].as_ref().unwrap(), &false);
}

#[test]
fn test_local_recv_timeout() {
    let mut members = LocalGroup::world_with_timeout(2, Duration::from_millis(50));
    let g = members.remove(1);
    // member 0 never joins the scatter
    assert!(g.scatter(None, 0).is_err());
}
// 8e55a3d0 ends here
