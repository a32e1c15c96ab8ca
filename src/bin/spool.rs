use std::{
    error::Error,
    io::{self, Read, Write},
};

use clap::{Parser, Subcommand};
use spool::QueueClient;

#[derive(Parser)]
#[command(version, about = "Talk to a spool server", long_about = None)]
struct Cli {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:6666")]
    address: String,
    #[command(subcommand)]
    command: Action,
}

#[derive(Subcommand)]
enum Action {
    /// Enqueue a message; reads stdin when no data is given
    Put { data: Option<String> },
    /// Dequeue the next message and write its body to stdout
    Get,
    /// Print the number of queued messages
    Size,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let mut client = QueueClient::connect(cli.address.as_str())?;

    match cli.command {
        Action::Put { data } => {
            let data = match data {
                Some(data) => data.into_bytes(),
                None => {
                    let mut buf = Vec::new();
                    io::stdin().lock().read_to_end(&mut buf)?;
                    buf
                }
            };
            let id = client.put(&data)?;
            println!("{id}");
        }
        Action::Get => match client.get()? {
            Some(message) => {
                eprintln!("{}", message.id);
                let mut stdout = io::stdout().lock();
                stdout.write_all(&message.data)?;
                stdout.flush()?;
            }
            None => eprintln!("EMPTY"),
        },
        Action::Size => println!("{}", client.size()?),
    }

    client.quit()?;
    Ok(())
}
