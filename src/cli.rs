// [[file:../intranode.note::3a532d42][3a532d42]]
use crate::common::*;
use gut::cli::*;

use crate::launcher::{self, NoHint};
use crate::{Group, IntranodeRankAssigner, LocalGroup, NodeKeyResolver};
use serde::Serialize;
// 3a532d42 ends here

// [[file:../intranode.note::4c7a1e02][4c7a1e02]]
/// What one process learned about its placement.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct RankReport {
    pub global_rank: usize,
    pub host: String,
    pub node_rank: usize,
    pub local_rank: usize,
    pub node_size: usize,
    /// Global ranks of the members of the node-local group, in local rank
    /// order.
    pub node_members: Vec<usize>,
}

pub(crate) fn simulate_member(group: LocalGroup, host: &str) -> Result<RankReport> {
    let resolver = NodeKeyResolver::new(NoHint).with_host(host);
    let assigner = IntranodeRankAssigner::new(resolver);
    let (node_rank, local) = assigner.node_rank_and_group(&group)?;
    let node_members = gather_global_ranks(&group, &local)?;

    Ok(RankReport {
        global_rank: group.rank(),
        host: host.into(),
        node_rank,
        local_rank: local.rank(),
        node_size: local.size(),
        node_members,
    })
}

/// Let every member of `local` learn the `group` ranks of all members of
/// `local`.
fn gather_global_ranks<G: Group>(group: &G, local: &G) -> Result<Vec<usize>> {
    let send = (group.rank() as u64).to_le_bytes();
    let mut members = vec![];
    for root in 0..local.size() {
        if let Some(buf) = local.gather(&send, root)? {
            members = buf
                .chunks_exact(8)
                .map(|c| Ok(u64::from_le_bytes(c.try_into()?) as usize))
                .collect::<Result<Vec<_>>>()?;
        }
    }
    if members.len() != local.size() {
        bail!("gathered {} node members, expected {}", members.len(), local.size());
    }
    Ok(members)
}

/// Run the local rank discovery in-process, with one simulated process per
/// host name given
#[derive(Parser)]
struct SimulateCli {
    /// Host name of each simulated process, in global rank order
    #[arg(required = true)]
    hosts: Vec<String>,

    /// Print a JSON report instead of one line per process
    #[arg(long)]
    json: bool,
}

impl SimulateCli {
    fn enter_main(self) -> Result<()> {
        let hosts = &self.hosts;
        info!("simulate {} processes", hosts.len());
        let reports = LocalGroup::run(hosts.len(), |g| {
            let host = hosts[g.rank()].as_str();
            simulate_member(g, host)
        })?
        .into_iter()
        .collect::<Result<Vec<_>>>()?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&reports)?);
        } else {
            for r in reports {
                println!("Rank {} {}", r.global_rank, r.local_rank);
            }
        }

        Ok(())
    }
}
// 4c7a1e02 ends here

// [[file:../intranode.note::9b0e5f61][9b0e5f61]]
/// Show host name and the placement hints exported by the MPI launcher
#[derive(Parser)]
struct EnvCli {}

impl EnvCli {
    fn enter_main(self) -> Result<()> {
        fn show(label: &str, value: Option<usize>) {
            match value {
                Some(v) => println!("{label:<12} {v}"),
                None => println!("{label:<12} -"),
            }
        }

        println!("{:<12} {}", "host", crate::hostname()?);
        show("global rank", launcher::get_global_rank_id()?);
        show("global size", launcher::get_global_number_of_ranks()?);
        show("node rank", launcher::get_node_rank_id()?);
        show("local rank", launcher::get_local_rank_id()?);
        show("local size", launcher::get_local_number_of_ranks()?);

        Ok(())
    }
}
// 9b0e5f61 ends here

// [[file:../intranode.note::1f6d94ac][1f6d94ac]]
/// Print the local rank of every process of the MPI world (to be called
/// with mpirun command)
#[cfg(feature = "mpi")]
#[derive(Parser)]
struct MpiCli {
    /// Ignore launcher hints and always discover ranks from host names
    #[arg(long)]
    no_fast_path: bool,
}

#[cfg(feature = "mpi")]
impl MpiCli {
    fn enter_main(self) -> Result<()> {
        use std::io::Write;

        let universe = ::mpi::initialize().ok_or_else(|| format_err!("MPI has already been initialized"))?;
        let world = crate::MpiGroup::world(&universe);
        let assigner = if self.no_fast_path {
            IntranodeRankAssigner::new(NodeKeyResolver::new(NoHint))
        } else {
            IntranodeRankAssigner::default()
        };
        let local_rank = assigner.local_rank(&world)?;

        // print in rank order
        for i in 0..world.size() {
            if world.rank() == i {
                println!("Rank {i} {local_rank}");
                std::io::stdout().flush()?;
            }
            world.barrier()?;
        }

        Ok(())
    }
}
// 1f6d94ac ends here

// [[file:../intranode.note::5f9971ad][5f9971ad]]
/// Find out the position of each process among the processes running on
/// the same node
#[derive(Parser)]
#[clap(author, version, about)]
struct Cli {
    #[clap(flatten)]
    verbose: gut::cli::Verbosity,

    #[clap(subcommand)]
    command: IntranodeCommand,
}

#[derive(Subcommand)]
enum IntranodeCommand {
    Simulate(SimulateCli),
    Env(EnvCli),
    #[cfg(feature = "mpi")]
    Mpi(MpiCli),
}

pub fn enter_main() -> Result<()> {
    let args = Cli::parse();
    args.verbose.setup_logger();

    match args.command {
        IntranodeCommand::Simulate(simulate) => {
            simulate.enter_main()?;
        }
        IntranodeCommand::Env(env) => {
            env.enter_main()?;
        }
        #[cfg(feature = "mpi")]
        IntranodeCommand::Mpi(mpi) => {
            debug!("run local rank discovery over MPI world ...");
            mpi.enter_main()?;
        }
    }

    Ok(())
}
// 5f9971ad ends here

// [[file:../intranode.note::70c2ab3e][70c2ab3e]]
#[test]
fn test_simulate_member() {
    let hosts = ["h1", "h1", "h2", "h2"];
    let reports = LocalGroup::run(hosts.len(), |g| {
        let host = hosts[g.rank()];
        simulate_member(g, host).unwrap()
    })
    .unwrap();

    let locals = reports.iter().map(|r| (r.node_rank, r.local_rank, r.node_size)).collect_vec();
    assert_eq!(locals, vec![(0, 0, 2), (0, 1, 2), (1, 0, 2), (1, 1, 2)]);
    assert_eq!(reports[1].node_members, vec![0, 1]);
    assert_eq!(reports[2].node_members, vec![2, 3]);
    let json = serde_json::to_string(&reports[3]).unwrap();
    assert!(json.contains(r#""host":"h2""#));
}

#[test]
fn test_cli_parse() {
    let args = Cli::try_parse_from(["intranode-ranks", "simulate", "--json", "a", "b"]).unwrap();
    match args.command {
        IntranodeCommand::Simulate(s) => {
            assert!(s.json);
            assert_eq!(s.hosts, vec!["a", "b"]);
        }
        _ => panic!("wrong subcommand"),
    }
    assert!(Cli::try_parse_from(["intranode-ranks", "simulate"]).is_err());
}
// 70c2ab3e ends here
