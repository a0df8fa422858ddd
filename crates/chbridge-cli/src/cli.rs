mod commands;
mod logging;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use chbridge_core::{ColumnProjection, FlatFileEndpoint, parse_delimiter};
use chbridge_drivers::DriverRegistry;
use chbridge_interchange::IfTableExists;
use chbridge_services::{BridgeConfig, ConnectionDefaults, ServiceError, TransferService};
use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(
    name = "chbridge",
    version,
    about = "Move data between ClickHouse tables and delimited files"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file, layered over the one in the user config directory
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(flatten)]
    connection: ConnectionArgs,
}

/// Connection flags; anything omitted comes from the config file
#[derive(Args, Debug, Default)]
struct ConnectionArgs {
    #[arg(long, global = true)]
    host: Option<String>,

    #[arg(long, global = true)]
    port: Option<u16>,

    #[arg(long, short = 'd', global = true)]
    database: Option<String>,

    #[arg(long, short = 'u', global = true)]
    user: Option<String>,

    #[arg(long, global = true)]
    password: Option<String>,

    /// Use HTTPS
    #[arg(long, global = true)]
    secure: bool,
}

impl ConnectionArgs {
    fn apply(self, defaults: &mut ConnectionDefaults) {
        if let Some(host) = self.host {
            defaults.host = host;
        }
        if let Some(port) = self.port {
            defaults.port = port;
        }
        if let Some(database) = self.database {
            defaults.database = database;
        }
        if let Some(user) = self.user {
            defaults.username = user;
        }
        if self.password.is_some() {
            defaults.password = self.password;
        }
        defaults.secure |= self.secure;
    }
}

#[derive(Args, Debug, Clone)]
struct FileArgs {
    /// Path of the delimited file
    path: PathBuf,

    /// Field delimiter: a single character, `tab` or `pipe`
    #[arg(long, default_value = ",", value_parser = delimiter)]
    delimiter: u8,

    /// The file has no header line; columns are named c1..cN
    #[arg(long)]
    no_header: bool,
}

impl FileArgs {
    fn endpoint(&self) -> FlatFileEndpoint {
        FlatFileEndpoint::new(&self.path)
            .with_delimiter(self.delimiter)
            .with_header(!self.no_header)
    }
}

fn delimiter(raw: &str) -> Result<u8, String> {
    parse_delimiter(raw).ok_or_else(|| format!("'{}' is not a single-byte delimiter", raw))
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum IfExists {
    Append,
    Truncate,
    Fail,
}

impl From<IfExists> for IfTableExists {
    fn from(mode: IfExists) -> Self {
        match mode {
            IfExists::Append => IfTableExists::Append,
            IfExists::Truncate => IfTableExists::Truncate,
            IfExists::Fail => IfTableExists::Fail,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Verify the server is reachable and the credentials are accepted
    Connect,
    /// List tables in the database
    Tables,
    /// Show the columns of a table
    Describe {
        table: String,
    },
    /// Show the column names of a delimited file
    DescribeFile {
        #[command(flatten)]
        file: FileArgs,
    },
    /// Export a table to a delimited file
    Export {
        table: String,
        #[command(flatten)]
        file: FileArgs,
        /// Columns to export, comma separated (default: all)
        #[arg(long, value_delimiter = ',')]
        columns: Vec<String>,
        /// Stream progress events to stderr
        #[arg(long)]
        progress: bool,
    },
    /// Import a delimited file into a table, creating it if needed
    Import {
        #[command(flatten)]
        file: FileArgs,
        /// Destination table
        #[arg(long)]
        table: String,
        /// File columns to import, comma separated (default: all)
        #[arg(long, value_delimiter = ',')]
        columns: Vec<String>,
        /// What to do when the table already exists
        #[arg(long, value_enum, default_value = "append")]
        if_exists: IfExists,
        #[arg(long)]
        progress: bool,
    },
    /// Join two tables on the server into a target table
    Join {
        left: String,
        right: String,
        /// Join predicate, e.g. "orders.customer_id = customers.id"
        #[arg(long = "on")]
        predicate: String,
        /// Target table
        #[arg(long = "into")]
        target: String,
        /// Output columns, bare or table-qualified, comma separated
        #[arg(long, value_delimiter = ',', required = true)]
        columns: Vec<String>,
        #[arg(long)]
        progress: bool,
    },
    /// Show the first rows of a table
    Preview {
        table: String,
        #[arg(long, value_delimiter = ',')]
        columns: Vec<String>,
        #[arg(long, short = 'n')]
        limit: Option<usize>,
    },
    /// Show the first rows of a delimited file
    PreviewFile {
        #[command(flatten)]
        file: FileArgs,
        #[arg(long, value_delimiter = ',')]
        columns: Vec<String>,
        #[arg(long, short = 'n')]
        limit: Option<usize>,
    },
}

/// `None` when no columns were given
fn projection(columns: Vec<String>) -> anyhow::Result<Option<ColumnProjection>> {
    if columns.is_empty() {
        return Ok(None);
    }
    Ok(Some(ColumnProjection::new(columns)?))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<ServiceError>() {
                Some(service) => eprintln!("error[{}]: {:#}", service.kind(), e),
                None => eprintln!("error: {:#}", e),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = BridgeConfig::load(cli.config.as_deref())?;
    let level = cli.log_level.as_deref().unwrap_or(&config.logging.level).to_string();
    let _log_guard = logging::init(&level, config.logging.json_dir.as_deref())?;

    cli.connection.apply(&mut config.connection);
    let endpoint = config.connection.endpoint();
    let service = TransferService::from_config(Arc::new(DriverRegistry::with_defaults()), &config);
    let out = output::Output::new(cli.json);

    let result = match cli.command {
        Commands::Connect => commands::schema::connect(&service, &endpoint, &out).await,
        Commands::Tables => commands::schema::tables(&service, &endpoint, &out).await,
        Commands::Describe { table } => {
            commands::schema::describe(&service, &endpoint, &table, &out).await
        }
        Commands::DescribeFile { file } => {
            commands::schema::describe_file(&service, &file.endpoint(), &out)
        }
        Commands::Export {
            table,
            file,
            columns,
            progress,
        } => {
            commands::transfer::export(
                &service,
                endpoint,
                table,
                file.endpoint(),
                projection(columns)?,
                progress,
                &out,
            )
            .await
        }
        Commands::Import {
            file,
            table,
            columns,
            if_exists,
            progress,
        } => {
            commands::transfer::import(
                &service,
                endpoint,
                file.endpoint(),
                table,
                projection(columns)?,
                if_exists.into(),
                progress,
                &out,
            )
            .await
        }
        Commands::Join {
            left,
            right,
            predicate,
            target,
            columns,
            progress,
        } => {
            let projection = ColumnProjection::new(columns)?;
            commands::transfer::join(
                &service,
                endpoint,
                chbridge_interchange::JoinSpec {
                    left,
                    right,
                    predicate,
                    target,
                    projection,
                },
                progress,
                &out,
            )
            .await
        }
        Commands::Preview {
            table,
            columns,
            limit,
        } => {
            let projection = projection(columns)?;
            commands::preview::table(&service, &endpoint, &table, projection.as_ref(), limit, &out)
                .await
        }
        Commands::PreviewFile {
            file,
            columns,
            limit,
        } => {
            let projection = projection(columns)?;
            commands::preview::file(&service, &file.endpoint(), projection.as_ref(), limit, &out)
                .await
        }
    };

    service.manager().close_all().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_import() {
        let cli = Cli::try_parse_from([
            "chbridge",
            "--host",
            "ch.internal",
            "import",
            "people.tsv",
            "--delimiter",
            "tab",
            "--table",
            "people",
            "--columns",
            "name,age",
            "--if-exists",
            "truncate",
        ])
        .unwrap();

        let Commands::Import {
            file,
            table,
            columns,
            if_exists,
            progress,
        } = cli.command
        else {
            panic!("expected import");
        };
        assert_eq!(file.delimiter, b'\t');
        assert!(!file.no_header);
        assert_eq!(table, "people");
        assert_eq!(columns, vec!["name", "age"]);
        assert!(matches!(if_exists, IfExists::Truncate));
        assert!(!progress);
        assert_eq!(cli.connection.host.as_deref(), Some("ch.internal"));
    }

    #[test]
    fn test_join_requires_columns() {
        let parsed = Cli::try_parse_from([
            "chbridge", "join", "orders", "customers", "--on", "orders.id = customers.id",
            "--into", "target",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_bad_delimiter_is_rejected() {
        let parsed = Cli::try_parse_from(["chbridge", "describe-file", "x.csv", "--delimiter", "ab"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_flags_override_config_connection() {
        let mut defaults = ConnectionDefaults::default();
        ConnectionArgs {
            host: Some("warehouse".into()),
            database: Some("analytics".into()),
            ..Default::default()
        }
        .apply(&mut defaults);

        let endpoint = defaults.endpoint();
        assert_eq!(endpoint.host(), "warehouse");
        assert_eq!(endpoint.database(), "analytics");
        assert_eq!(endpoint.port(), 8123);
    }
}
