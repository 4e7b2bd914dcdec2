use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[clap(name = "ord420-indexer", author, version, about, long_about = None)]
pub struct Opts {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, PartialEq, Clone, Debug)]
pub enum Command {
    /// Run the indexing driver
    #[clap(subcommand)]
    Service(ServiceCommand),
    /// Database operations
    #[clap(subcommand)]
    Database(DatabaseCommand),
}

#[derive(Subcommand, PartialEq, Clone, Debug)]
pub enum ServiceCommand {
    /// Start the driver loop and the metrics server
    #[clap(name = "start", bin_name = "start")]
    Start(ServiceStartCommand),
}

#[derive(Parser, PartialEq, Clone, Debug)]
pub struct ServiceStartCommand {
    /// Skip starting the prometheus metrics server even if PROMETHEUS_PORT is set
    #[clap(long = "no-metrics")]
    pub no_metrics: bool,
}

#[derive(Subcommand, PartialEq, Clone, Debug)]
pub enum DatabaseCommand {
    /// Applies pragmas and the schema to DB_PATH, creating the file if absent
    #[clap(name = "migrate", bin_name = "migrate")]
    Migrate(MigrateDatabaseCommand),
    /// Drops every table at DB_PATH and reapplies the schema from scratch
    #[clap(name = "reset", bin_name = "reset")]
    Reset(ResetDatabaseCommand),
}

#[derive(Parser, PartialEq, Clone, Debug)]
pub struct MigrateDatabaseCommand {}

#[derive(Parser, PartialEq, Clone, Debug)]
pub struct ResetDatabaseCommand {
    /// Skip the interactive confirmation prompt
    #[clap(long = "yes")]
    pub yes: bool,
}
