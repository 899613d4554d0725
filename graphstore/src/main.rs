use graphstore::{Dataset, GraphStore, StoreConfig, StoreError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const USAGE: &str = "usage: graphstore <command>

commands:
  add <name>            create a dataset
  remove <name>         delete a dataset and everything it references
  list                  list every dataset
  prefix <prefix>       list datasets whose name starts with <prefix>
  range <start> <end>   list datasets with start <= name < end";

/// A parsed command line.
#[derive(Debug, PartialEq, Eq)]
enum Command {
    Add(String),
    Remove(String),
    List,
    Prefix(String),
    Range(String, String),
}

impl Command {
    fn parse(args: &[String]) -> Option<Self> {
        match args {
            [cmd, name] if cmd == "add" => Some(Self::Add(name.clone())),
            [cmd, name] if cmd == "remove" => Some(Self::Remove(name.clone())),
            [cmd] if cmd == "list" => Some(Self::List),
            [cmd, prefix] if cmd == "prefix" => Some(Self::Prefix(prefix.clone())),
            [cmd, start, end] if cmd == "range" => Some(Self::Range(start.clone(), end.clone())),
            _ => None,
        }
    }
}

fn print_datasets(datasets: &[Dataset]) {
    for dataset in datasets {
        println!("{}\t{}", dataset.id, dataset.name);
    }
}

async fn run(store: &GraphStore, command: Command) -> Result<(), StoreError> {
    match command {
        Command::Add(name) => {
            let dataset = store.create_dataset(&name).await?;
            println!("{}\t{}", dataset.id, dataset.name);
        }
        Command::Remove(name) => match store.delete_dataset(&name).await? {
            Some(dataset) => println!("removed {}", dataset.name),
            None => println!("no dataset named {name}"),
        },
        Command::List => print_datasets(&store.all_datasets().await?),
        Command::Prefix(prefix) => print_datasets(&store.match_dataset_prefix(&prefix).await?),
        Command::Range(start, end) => {
            print_datasets(&store.match_dataset_range(&start, &end).await?);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "graphstore=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = Command::parse(&args) else {
        eprintln!("{USAGE}");
        std::process::exit(2);
    };

    // Load configuration from environment variables
    let config = match StoreConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    tracing::debug!(
        "Loaded configuration: data_directory={}, sync_on_commit={}",
        config.data_directory.display(),
        config.sync_on_commit
    );

    let store = match GraphStore::open(&config) {
        Ok(store) => store,
        Err(e) => {
            tracing::error!("Failed to open store: {e}");
            std::process::exit(1);
        }
    };

    let outcome = run(&store, command).await;
    if let Err(e) = store.close(false).await {
        tracing::error!("Failed to close store: {e}");
    }
    if let Err(e) = outcome {
        tracing::error!("{e}");
        std::process::exit(1);
    }
}
