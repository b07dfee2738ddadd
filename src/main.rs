use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use kdbx_codec::{CompressionAlgorithm, Database, Group, Storage, default_storage, tree};
use tracing_subscriber::EnvFilter;

mod auth;

#[derive(Debug, Parser)]
#[command(name = "kdbx-codec")]
#[command(version, about = "Reads and writes encrypted KDBX 3.1 password databases.")]
struct Cli {
    /// Path to the database file
    #[arg(long, global = true, value_name = "PATH", env = "KDBX_PATH")]
    db: Option<PathBuf>,

    /// Key file combined with the password
    #[arg(long, global = true, value_name = "PATH", env = "KDBX_KEY_FILE")]
    key_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Creates a new, empty database
    Init {
        /// Key transformation rounds
        #[arg(long, default_value_t = kdbx_codec::crypto::kdf::DEFAULT_TRANSFORM_ROUNDS)]
        rounds: u64,

        /// Store the document uncompressed
        #[arg(long)]
        no_compression: bool,

        /// Database name
        #[arg(long)]
        name: Option<String>,
    },

    /// Adds a group below the root group
    #[command(arg_required_else_help = true)]
    AddGroup {
        name: String,

        /// Parent group (default: root)
        #[arg(long)]
        parent: Option<String>,
    },

    /// Adds an entry
    #[command(arg_required_else_help = true)]
    Add {
        title: String,
        password: String,

        #[arg(long)]
        username: Option<String>,

        #[arg(long)]
        url: Option<String>,

        /// Group to add the entry to (default: root)
        #[arg(long)]
        group: Option<String>,
    },

    /// Prints the password of an entry
    #[command(arg_required_else_help = true)]
    Get { title: String },

    /// Lists all entries
    List,

    /// Removes an entry
    #[command(arg_required_else_help = true)]
    Remove { title: String },

    /// Shows information about the database
    Info {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .try_init();
}

fn resolve_storage(path: Option<PathBuf>) -> Result<Storage> {
    match path {
        Some(p) => Ok(Storage::new(p)),
        None => Ok(default_storage()?),
    }
}

fn open(cli: &Cli, storage: &Storage) -> Result<Database> {
    if !storage.exists() {
        bail!("database does not exist: {}", storage.path().display());
    }
    let password = auth::read_password()?;
    let key = auth::composite_key(&password, cli.key_file.as_deref())?;
    storage
        .load_database(key)
        .with_context(|| format!("failed to open {}", storage.path().display()))
}

fn save(db: &Database, storage: &Storage) -> Result<()> {
    storage
        .save_database(db)
        .with_context(|| format!("failed to save {}", storage.path().display()))?;
    Ok(())
}

fn print_group(group: &Group, path: &str) -> Result<()> {
    for entry in &group.entries {
        let title = entry.title()?.unwrap_or_default();
        match entry.username()? {
            Some(user) if !user.is_empty() => println!("{path}/{title}  ({user})"),
            _ => println!("{path}/{title}"),
        }
    }
    for child in &group.groups {
        print_group(child, &format!("{path}/{}", child.name))?;
    }
    Ok(())
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let storage = resolve_storage(cli.db.clone())?;

    match &cli.command {
        Commands::Init {
            rounds,
            no_compression,
            name,
        } => {
            if storage.exists() {
                bail!("database already exists: {}", storage.path().display());
            }
            let password = auth::read_new_password_with_confirmation()?;
            let key = auth::composite_key(&password, cli.key_file.as_deref())?;

            let mut db = Database::new(key);
            db.transform_rounds = *rounds;
            if *no_compression {
                db.compression = CompressionAlgorithm::None;
            }
            if let Some(name) = name {
                db.set_name(name);
            }
            save(&db, &storage)?;
            println!("database initialized at {}", storage.path().display());
        }
        Commands::AddGroup { name, parent } => {
            let mut db = open(&cli, &storage)?;
            let target = match parent {
                Some(p) => db
                    .root
                    .find_group_mut(p)
                    .with_context(|| format!("group '{p}' not found"))?,
                None => &mut db.root,
            };
            target.add_group(Group::new(name));
            save(&db, &storage)?;
            println!("group '{name}' added");
        }
        Commands::Add {
            title,
            password,
            username,
            url,
            group,
        } => {
            let mut db = open(&cli, &storage)?;
            if db.root.find_entry(title).is_some() {
                bail!("entry '{title}' already exists");
            }

            let mut fields = vec![(tree::TITLE, title.as_str()), (tree::PASSWORD, password.as_str())];
            if let Some(user) = username {
                fields.push((tree::USER_NAME, user.as_str()));
            }
            if let Some(url) = url {
                fields.push((tree::URL, url.as_str()));
            }
            let entry = db.new_entry(&fields)?;

            let target = match group {
                Some(g) => db
                    .root
                    .find_group_mut(g)
                    .with_context(|| format!("group '{g}' not found"))?,
                None => &mut db.root,
            };
            target.add_entry(entry);
            save(&db, &storage)?;
            println!("entry '{title}' added");
        }
        Commands::Get { title } => {
            let db = open(&cli, &storage)?;
            let entry = db
                .root
                .find_entry(title)
                .with_context(|| format!("entry '{title}' not found"))?;
            let password = entry
                .password()
                .with_context(|| format!("failed to read password of '{title}'"))?;
            println!("{}", password.unwrap_or_default());
        }
        Commands::List => {
            let db = open(&cli, &storage)?;
            if db.root.counts().1 == 0 {
                println!("No entries stored.");
            } else {
                print_group(&db.root, &db.root.name)?;
            }
        }
        Commands::Remove { title } => {
            let mut db = open(&cli, &storage)?;
            if db.root.remove_entry(title).is_none() {
                bail!("entry '{title}' not found");
            }
            save(&db, &storage)?;
            println!("entry '{title}' removed");
        }
        Commands::Info { json } => {
            let db = open(&cli, &storage)?;
            let info = db.info();
            if *json {
                println!("{}", serde_json::to_string_pretty(&info)?);
            } else {
                println!("{info}");
            }
        }
    }

    Ok(())
}
