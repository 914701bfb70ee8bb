use clap::{Parser, Subcommand};

/// autogate: authenticated relay gateway for automation workflows
#[derive(Parser)]
#[command(name = "autogate", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the gateway server
    Serve {
        /// Port to bind (overrides AUTOGATE_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Print the route table
    Routes,

    /// Manage users
    User {
        #[command(subcommand)]
        command: UserCommands,
    },
}

#[derive(Subcommand)]
pub enum UserCommands {
    /// Register a user directly in the store
    Add {
        #[arg(long)]
        username: String,
        #[arg(long, env = "AUTOGATE_NEW_USER_PASSWORD", hide_env_values = true)]
        password: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parses_user_add() {
        let cli = Cli::try_parse_from([
            "autogate", "user", "add", "--username", "alice", "--password", "pw",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::User {
                command: UserCommands::Add { username, password },
            }) => {
                assert_eq!(username, "alice");
                assert_eq!(password, "pw");
            }
            _ => panic!("expected user add"),
        }
    }
}
