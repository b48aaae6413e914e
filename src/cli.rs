use std::path::PathBuf;
use structopt::StructOpt;

/// Converge PostgreSQL roles, privileges and group memberships to the
/// state described in YAML files
#[derive(Debug, StructOpt)]
#[structopt(name = "pgrole")]
pub struct Cli {
    #[structopt(subcommand)]
    pub cmd: Command,
}

#[derive(StructOpt, Debug)]
pub enum Command {
    /// Generate random password
    GenPass {
        /// The password length
        #[structopt(short, long, default_value = "16")]
        length: u8,
        /// The username, using to create md5 hash
        #[structopt(short, long)]
        username: Option<String>,
        /// The password, using to create md5 hash
        #[structopt(short, long)]
        password: Option<String>,
    },

    /// Apply changes
    Apply {
        /// The path to the file to read
        #[structopt(short, long, parse(from_os_str))]
        file: PathBuf,

        /// Compute the changes, then roll everything back
        #[structopt(long, alias = "dryrun")]
        check: bool,

        /// Connection string, overrides the one in the file
        #[structopt(short, long)]
        conn: Option<String>,

        /// Apply every file of the --file directory
        #[structopt(short, long)]
        all: bool,
    },

    /// Validate target file
    Validate {
        /// The path to the file or directory to read (optional)
        #[structopt(short, long, parse(from_os_str))]
        file: Option<PathBuf>,
    },

    /// Inspect the roles named in a config file
    Inspect {
        /// The path to the file to read
        #[structopt(short, long, parse(from_os_str))]
        file: PathBuf,
    },
}

// Parse the command line arguments
pub fn parse() -> Cli {
    Cli::from_args()
}
