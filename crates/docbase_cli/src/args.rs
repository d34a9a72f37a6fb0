//! Command line definitions.

use clap::{Parser, Subcommand};
use docbase_core::SortOrder;

/// Manage `Base` records in a CouchDB/Cloudant database.
#[derive(Parser, Debug)]
#[command(name = "docbase")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Database holding the records
    #[arg(long, global = true, env = "CLOUDANT_DBNAME", default_value = "pets")]
    pub database: String,

    /// trace|debug|info|warn|error; defaults by build profile
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Absolute directory for rotating log files; stderr when omitted
    #[arg(long, global = true)]
    pub log_dir: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a record and print it with its new id
    Create {
        #[arg(long)]
        name: String,
    },

    /// Print one record
    Get { id: String },

    /// Print all records, or those with an exact name
    List {
        #[arg(long)]
        name: Option<String>,
    },

    /// Rename a stored record
    Update {
        id: String,
        #[arg(long)]
        name: String,
    },

    /// Delete one record
    Delete { id: String },

    /// Delete every document in the database
    Reset,

    /// Create a JSON query index on a field
    Index {
        field: String,
        #[arg(long, default_value = "asc", value_parser = parse_order)]
        order: SortOrder,
    },
}

fn parse_order(value: &str) -> Result<SortOrder, String> {
    SortOrder::parse(value).ok_or_else(|| format!("expected asc or desc, got `{value}`"))
}

#[cfg(test)]
mod tests {
    use super::{Cli, Command};
    use clap::Parser;
    use docbase_core::SortOrder;

    #[test]
    fn parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["docbase", "list", "--database", "shelter", "--name", "Rex"])
            .unwrap();
        assert_eq!(cli.database, "shelter");
        assert!(matches!(cli.command, Command::List { name: Some(ref name) } if name == "Rex"));
    }

    #[test]
    fn index_order_defaults_to_ascending() {
        let cli = Cli::try_parse_from(["docbase", "index", "name"]).unwrap();
        assert!(matches!(cli.command, Command::Index { order: SortOrder::Asc, .. }));

        assert!(Cli::try_parse_from(["docbase", "index", "name", "--order", "sideways"]).is_err());
    }
}
