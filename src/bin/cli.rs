//! RaftKV CLI Client
//!
//! Command-line interface for interacting with a RaftKV node.

use std::collections::BTreeMap;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use raftkv::network::Client;
use raftkv::StoreError;

/// RaftKV CLI
#[derive(Parser, Debug)]
#[command(name = "raftkv-cli")]
#[command(about = "CLI for the RaftKV replicated key-value store")]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:10002")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Set {
        /// The key to set
        key: String,

        /// The value to set
        value: String,
    },

    /// Set several pairs given as key=value
    SetMany {
        /// Pairs in key=value form
        #[arg(required = true)]
        pairs: Vec<String>,
    },

    /// Delete a key
    Del {
        /// The key to delete
        key: String,
    },

    /// Add a voter to the cluster
    Join {
        /// Id of the joining node
        id: String,

        /// Address of the joining node
        address: String,
    },

    /// Remove a voter from the cluster
    Detach {
        /// Id of the node to remove
        id: String,

        /// Address of the node to remove
        address: String,
    },

    /// List the voter configuration
    Servers,

    /// Show the node's role
    State,

    /// List all keys
    Keys,

    /// Show consensus statistics
    Stats,

    /// Ping the server
    Ping,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let mut client = match Client::connect(&args.server) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("(error) cannot connect to {}: {}", args.server, e);
            return ExitCode::FAILURE;
        }
    };

    match run(&mut client, args.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(StoreError::NotLeader { leader: Some(leader) }) => {
            eprintln!("(redirect) leader is {} at {}", leader.id, leader.address);
            ExitCode::FAILURE
        }
        Err(StoreError::NotLeader { leader: None }) => {
            eprintln!("(redirect) no leader known, retry later");
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("(error) {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(client: &mut Client, command: Commands) -> raftkv::Result<()> {
    match command {
        Commands::Get { key } => match client.get(&key)? {
            Some(value) => println!("{}", value),
            None => println!("(nil)"),
        },
        Commands::Set { key, value } => {
            client.set(&key, &value)?;
            println!("OK");
        }
        Commands::SetMany { pairs } => {
            let pairs = parse_pairs(&pairs)?;
            client.set_many(pairs)?;
            println!("OK");
        }
        Commands::Del { key } => {
            client.delete(&key)?;
            println!("OK");
        }
        Commands::Join { id, address } => {
            client.join(&id, &address)?;
            println!("OK");
        }
        Commands::Detach { id, address } => {
            client.detach(&id, &address)?;
            println!("OK");
        }
        Commands::Servers => {
            for server in client.servers()? {
                println!("{}\t{}", server.id, server.address);
            }
        }
        Commands::State => println!("{}", client.state()?),
        Commands::Keys => {
            for key in client.keys()? {
                println!("{}", key);
            }
        }
        Commands::Stats => {
            for (name, value) in client.stats()? {
                println!("{}: {}", name, value);
            }
        }
        Commands::Ping => {
            client.ping()?;
            println!("PONG");
        }
    }
    Ok(())
}

fn parse_pairs(raw: &[String]) -> raftkv::Result<BTreeMap<String, String>> {
    raw.iter()
        .map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .ok_or_else(|| StoreError::Config(format!("expected key=value, got {:?}", pair)))
        })
        .collect()
}
