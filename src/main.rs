//! Quiver-DB CLI
//!
//! An in-memory vector search engine speaking a length-prefixed TCP
//! protocol.
//!
//! # Usage
//!
//! ```bash
//! # Start the server
//! quiver-db serve --port 1234
//!
//! # Send one command
//! quiver-db client -- create_collection music
//! quiver-db client -- add_to_collection music track1 0.1,0.4,0.2
//! quiver-db client -- query music 0.1,0.4,0.2 5
//!
//! # Seed a collection with random records
//! quiver-db client --generate 1000 --collection music --dim 10
//! ```

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing_subscriber::EnvFilter;

use quiver_db::protocol::{self, MAX_MSG};
use quiver_db::server::{serve, ServerState};

#[derive(Parser)]
#[command(name = "quiver-db")]
#[command(about = "An in-memory vector search engine")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the TCP server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "1234")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
    },

    /// Send one framed command to a running server
    Client {
        /// Server address
        #[arg(long, default_value = "127.0.0.1:1234")]
        addr: String,

        /// Upload this many random records instead of sending a command
        #[arg(long)]
        generate: Option<usize>,

        /// Target collection for --generate
        #[arg(long, default_value = "collection_name")]
        collection: String,

        /// Vector dimension for --generate
        #[arg(long, default_value = "10")]
        dim: usize,

        /// Command verb and arguments, passed through verbatim
        #[arg(trailing_var_arg = true)]
        args: Vec<String>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port, host } => {
            let addr: SocketAddr = format!("{}:{}", host, port)
                .parse()
                .context("invalid listen address")?;
            let state = Arc::new(ServerState::new());
            serve(state, addr).await?;
        }

        Commands::Client {
            addr,
            generate,
            collection,
            dim,
            args,
        } => {
            let mut stream =
                TcpStream::connect(&addr).with_context(|| format!("connect to {}", addr))?;

            if let Some(count) = generate {
                let mut rng = rand::thread_rng();
                for _ in 0..count {
                    let key: String = (&mut rng)
                        .sample_iter(&Alphanumeric)
                        .take(10)
                        .map(char::from)
                        .collect();
                    let vector: Vec<String> = (0..dim)
                        .map(|_| format!("{}", rng.gen::<f32>()))
                        .collect();
                    let command = vec![
                        "add_to_collection".to_string(),
                        collection.clone(),
                        key,
                        vector.join(","),
                    ];
                    send_command(&mut stream, &command)?;
                }
                tracing::info!(count, collection = collection.as_str(), "records uploaded");
            } else {
                if args.is_empty() {
                    bail!("no command given; pass a verb and arguments after `--`");
                }
                send_command(&mut stream, &args)?;
            }
        }
    }

    Ok(())
}

/// Write one request frame and print the server's reply.
fn send_command(stream: &mut TcpStream, args: &[String]) -> anyhow::Result<()> {
    let frame = protocol::encode_request(args)?;
    stream.write_all(&frame)?;

    let mut len_buf = [0u8; 4];
    stream
        .read_exact(&mut len_buf)
        .context("read response length")?;
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_MSG {
        bail!("response of {} bytes exceeds protocol limit", len);
    }

    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).context("read response body")?;
    let (code, payload) = protocol::parse_response(&body)?;
    println!(
        "server says: [{}] {}",
        code.as_u32(),
        String::from_utf8_lossy(&payload)
    );
    Ok(())
}
