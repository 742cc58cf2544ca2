use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use blitzscope::cli::results::{parse_hours, ResultsQuery};
use blitzscope::cli::{analyze, calls, clear, connection, import, recommend, results};
use blitzscope::config::Config;
use blitzscope::procedure::filter::CacheThresholds;
use blitzscope::procedure::ProcedureKind;
use blitzscope::store::{NewConnection, ResultStore};

#[derive(Parser)]
#[command(name = "blitzscope")]
#[command(about = "Store and analyze SQL Server First Responder Kit results")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "blitzscope.yaml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage registered SQL Server connections
    Connection {
        #[command(subcommand)]
        command: ConnectionCommands,
    },

    /// Import a procedure's exported result set
    Import {
        /// Procedure (sp_Blitz, sp_BlitzIndex, sp_BlitzCache)
        procedure: ProcedureKind,
        /// JSON file holding an array of result rows
        file: PathBuf,
        /// Connection ID the results belong to
        #[arg(long)]
        connection: i64,
    },

    /// List procedure calls
    Calls {
        /// Only calls against this connection
        #[arg(long)]
        connection: Option<i64>,
    },

    /// List the rows of a call
    Results {
        call_id: i64,

        /// Hide rows with a priority above this value
        #[arg(long)]
        max_priority: Option<i64>,

        /// Only show these finding groups (repeatable)
        #[arg(long = "group")]
        groups: Vec<String>,

        /// Print the finding groups present in the call and exit
        #[arg(long)]
        list_groups: bool,

        #[arg(long)]
        min_avg_cpu: Option<f64>,

        #[arg(long)]
        min_total_cpu: Option<f64>,

        #[arg(long)]
        min_executions: Option<i64>,

        #[arg(long)]
        min_total_reads: Option<i64>,

        /// Last-execution hour window, e.g. 22-6
        #[arg(long)]
        hours: Option<String>,

        /// avg_cpu_ms, total_cpu_ms, executions or total_reads
        #[arg(long)]
        sort_by: Option<String>,

        /// Sort ascending instead of largest first
        #[arg(long)]
        asc: bool,
    },

    /// Show one row with its conversation and recommendations
    Show {
        call_id: i64,
        /// Position of the row in the call's output
        index: i64,
    },

    /// Ask the configured model about one or more rows
    Analyze {
        call_id: i64,
        /// Row positions; several run the first turn on each
        #[arg(required = true, num_args = 1..)]
        indexes: Vec<i64>,
        /// Follow-up question (required after the first turn)
        #[arg(short, long)]
        question: Option<String>,
    },

    /// Manage recommendations
    Recommend {
        #[command(subcommand)]
        command: RecommendCommands,
    },

    /// Delete stored results
    Clear {
        /// Only results of this connection
        #[arg(long)]
        connection: Option<i64>,
    },
}

#[derive(Subcommand)]
enum ConnectionCommands {
    /// Register an instance
    Add {
        /// Database name
        #[arg(long)]
        name: String,
        #[arg(long)]
        host: String,
        #[arg(long, default_value_t = 1433)]
        port: u16,
        #[arg(long)]
        user: String,
        /// Password (defaults to $MSSQL_PASSWORD)
        #[arg(long, env = "MSSQL_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// List registered instances
    List,
    /// Remove an instance and everything stored for it
    Remove { id: i64 },
    /// Record server version and memory
    Refresh {
        id: i64,
        #[arg(long)]
        version: Option<String>,
        #[arg(long)]
        memory_mb: Option<i64>,
    },
}

#[derive(Subcommand)]
enum RecommendCommands {
    /// Attach a recommendation to a row
    Add {
        call_id: i64,
        index: i64,
        description: String,
        /// T-SQL that applies the recommendation
        #[arg(long)]
        sql: Option<String>,
    },
    /// List recommendations for a connection
    List {
        #[arg(long)]
        connection: i64,
        #[arg(long)]
        procedure: Option<ProcedureKind>,
    },
    /// Remove a recommendation
    Remove { id: i64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    // Load config
    let config = Config::load(&cli.config)?;

    // Initialize store
    let store = ResultStore::open(&config.database_path())?;

    match cli.command {
        Commands::Connection { command } => match command {
            ConnectionCommands::Add {
                name,
                host,
                port,
                user,
                password,
            } => {
                connection::add(
                    &store,
                    NewConnection {
                        db_name: name,
                        db_user: user,
                        db_password: password,
                        db_host: host,
                        db_port: port,
                        version: None,
                        instance_memory_mb: None,
                    },
                )?;
            }
            ConnectionCommands::List => {
                connection::list(&store)?;
            }
            ConnectionCommands::Remove { id } => {
                connection::remove(&store, id)?;
            }
            ConnectionCommands::Refresh {
                id,
                version,
                memory_mb,
            } => {
                connection::refresh(&store, id, version, memory_mb)?;
            }
        },
        Commands::Import {
            procedure,
            file,
            connection,
        } => {
            import::run(&store, procedure, file, connection)?;
        }
        Commands::Calls { connection } => {
            calls::run(&store, connection)?;
        }
        Commands::Results {
            call_id,
            max_priority,
            groups,
            list_groups,
            min_avg_cpu,
            min_total_cpu,
            min_executions,
            min_total_reads,
            hours,
            sort_by,
            asc,
        } => {
            let query = ResultsQuery {
                max_priority,
                groups,
                list_groups,
                thresholds: CacheThresholds {
                    min_avg_cpu_ms: min_avg_cpu,
                    min_total_cpu_ms: min_total_cpu,
                    min_executions,
                    min_total_reads,
                },
                sort_by,
                descending: !asc,
                hours: hours.as_deref().map(parse_hours).transpose()?,
            };
            results::list(&store, call_id, &query)?;
        }
        Commands::Show { call_id, index } => {
            results::show(&store, call_id, index)?;
        }
        Commands::Analyze {
            call_id,
            indexes,
            question,
        } => {
            analyze::run(&store, &config, call_id, &indexes, question).await?;
        }
        Commands::Recommend { command } => match command {
            RecommendCommands::Add {
                call_id,
                index,
                description,
                sql,
            } => {
                recommend::add(&store, call_id, index, description, sql)?;
            }
            RecommendCommands::List {
                connection,
                procedure,
            } => {
                recommend::list(&store, connection, procedure)?;
            }
            RecommendCommands::Remove { id } => {
                recommend::remove(&store, id)?;
            }
        },
        Commands::Clear { connection } => {
            clear::run(&store, connection)?;
        }
    }

    Ok(())
}
