/*
 * quorumkv runs a single replica of a replicated key-value store. It takes
 * the UDP port of the local datagram router, its own replica id, and the ids
 * of its peers, then joins the cluster and serves client get/put traffic.
 */

#![warn(clippy::all)]

use quorumkv::error::Result;
use quorumkv::raft;

fn main() -> Result<()> {
    let args = clap::command!()
        .arg(
            clap::Arg::new("port")
                .required(true)
                .value_parser(clap::value_parser!(u16))
                .help("UDP port of the local datagram router"),
        )
        .arg(clap::Arg::new("id").required(true).help("This replica's id"))
        .arg(
            clap::Arg::new("peers")
                .required(true)
                .num_args(1..)
                .help("The ids of the other replicas in the cluster"),
        )
        .arg(
            clap::Arg::new("log-level")
                .short('l')
                .long("log-level")
                .default_value("info")
                .help("Log level"),
        )
        .get_matches();

    let loglevel =
        args.get_one::<String>("log-level").unwrap().parse::<simplelog::LevelFilter>()?;
    simplelog::SimpleLogger::init(loglevel, simplelog::Config::default())?;

    let port = *args.get_one::<u16>("port").unwrap();
    let id = args.get_one::<String>("id").unwrap().clone();
    let peers = args.get_many::<String>("peers").unwrap().cloned().collect();

    raft::Server::new(port, id, peers)?.serve()
}
