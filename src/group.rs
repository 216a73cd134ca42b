// [[file:../intranode.note::*docs][docs:1]]
//! The collective operations the rank discovery protocol runs on.
// docs:1 ends here

// [[file:../intranode.note::*imports][imports:1]]
use super::*;
// imports:1 ends here

// [[file:../intranode.note::9d2e61fb][9d2e61fb]]
/// An ordered group of processes able to run collective operations
/// together, i.e. a communicator.
///
/// Every collective call blocks until all members of the group have made
/// the same call. A member skipping a call leaves the others waiting, and
/// so does a root failing its own checks before any data moves:
/// `LocalGroup` peers wait until their receive timeout, `MpiGroup` aborts
/// the job instead.
pub trait Group: Sized {
    /// The number of members in the group.
    fn size(&self) -> usize;

    /// The rank of the calling member, in `0..size`.
    fn rank(&self) -> usize;

    /// Return true if this group holds every process of the job, i.e. the
    /// world communicator.
    fn is_world(&self) -> bool;

    /// Collect `send` from every member at `root`, concatenated in rank
    /// order. Returns the gathered buffer at `root` and None elsewhere. All
    /// members must send the same number of bytes.
    fn gather(&self, send: &[u8], root: usize) -> Result<Option<Vec<u8>>>;

    /// Distribute the `i`-th value of `send` to member `i`. `send` is only
    /// read at `root` and must hold exactly `size` values there.
    fn scatter(&self, send: Option<&[u64]>, root: usize) -> Result<u64>;

    /// Partition the group: members calling with the same `color` end up
    /// in the same new group, ordered by `key`.
    fn split(&self, color: usize, key: usize) -> Result<Self>;

    /// Block until every member has entered the barrier.
    fn barrier(&self) -> Result<()>;
}
// 9d2e61fb ends here

// [[file:../intranode.note::b3f7a2d9][b3f7a2d9]]
/// Check the values a scatter root is about to distribute.
pub(crate) fn check_scatter_send(send: Option<&[u64]>, size: usize) -> Result<&[u64]> {
    let send = send.ok_or_else(|| format_err!("scatter: root has nothing to send"))?;
    if send.len() != size {
        bail!("scatter: {} values for a group of {size} members", send.len());
    }
    Ok(send)
}

/// Check that every member contributed `expected` bytes to a gather;
/// `lengths` is indexed by rank.
pub(crate) fn check_gather_lengths(lengths: &[u64], expected: usize) -> Result<()> {
    if let Some((rank, len)) = lengths.iter().enumerate().find(|&(_, &len)| len != expected as u64) {
        bail!("gather: rank {rank} sent {len} bytes, root expects {expected}");
    }
    Ok(())
}

#[test]
fn test_collective_checks() {
    assert_eq!(check_scatter_send(Some(&[1, 2, 3][..]), 3).unwrap(), &[1, 2, 3]);
    assert!(check_scatter_send(Some(&[1, 2][..]), 3).is_err());
    assert!(check_scatter_send(None, 3).is_err());

    assert!(check_gather_lengths(&[4, 4, 4], 4).is_ok());
    assert!(check_gather_lengths(&[], 4).is_ok());
    let err = check_gather_lengths(&[4, 5, 4], 4).unwrap_err();
    assert!(format!("{err}").contains("rank 1 sent 5 bytes"));
}
// b3f7a2d9 ends here
