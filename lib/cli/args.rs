use clap::Parser;

use crate::cli::styles;

//-------------------------------------------------------------------------------------------------
// Types
//-------------------------------------------------------------------------------------------------

/// `dcsandbox` materializes short-lived, isolated development sandboxes and
/// exposes each one to AI coding assistants over MCP
#[derive(Debug, Parser)]
#[command(name = "dcsandbox", author, version, styles=styles::styles(), disable_version_flag = true)]
pub struct DcsandboxArgs {
    /// The subcommand to run
    #[command(subcommand)]
    pub subcommand: Option<DcsandboxSubcommand>,

    /// Enable verbose logging
    #[arg(short = 'V', long)]
    pub verbose: bool,
}

/// Available subcommands for managing sandboxes
#[derive(Debug, Parser)]
pub enum DcsandboxSubcommand {
    /// Create a new sandbox and leave it running
    #[command(name = "create")]
    Create {
        /// Repository to clone into the workspace
        #[arg(long = "git", name = "URL")]
        git: Option<String>,

        /// Branch to clone
        #[arg(long, default_value = "main")]
        branch: String,

        /// Sandbox name; derived from the repository basename if omitted
        #[arg(short, long)]
        name: Option<String>,

        /// Template to build from
        #[arg(short, long)]
        template: Option<String>,

        /// Memory limit, e.g. 512M or 2G
        #[arg(long)]
        memory: Option<String>,

        /// Number of CPUs
        #[arg(long, alias = "cpus")]
        cpu: Option<f64>,

        /// Sandbox lifetime in minutes
        #[arg(long)]
        timeout: Option<u64>,

        /// Exempt the sandbox from the lifetime reaper
        #[arg(long)]
        persist: bool,

        /// Run project detection on the clone to pick the template
        #[arg(long)]
        auto_detect: bool,

        /// Serve the MCP endpoint from a detached background process
        #[arg(short, long)]
        detach: bool,
    },

    /// List sandboxes, newest first
    #[command(name = "list")]
    List,

    /// Show a sandbox record and live container state
    #[command(name = "info")]
    Info {
        /// The sandbox id
        #[arg(required = true)]
        id: String,
    },

    /// Start a stopped sandbox
    #[command(name = "start")]
    Start {
        /// The sandbox id
        #[arg(required = true)]
        id: String,

        /// Serve the MCP endpoint from a detached background process
        #[arg(short, long)]
        detach: bool,
    },

    /// Stop a running sandbox
    #[command(name = "stop")]
    Stop {
        /// The sandbox id
        #[arg(required = true)]
        id: String,
    },

    /// Remove a sandbox and everything it owns
    #[command(name = "remove")]
    Remove {
        /// The sandbox id
        #[arg(required = true)]
        id: String,

        /// Swallow cleanup failures and report success
        #[arg(short, long)]
        force: bool,
    },

    /// Remove stopped and errored sandboxes
    #[command(name = "cleanup")]
    Cleanup {
        /// Remove every sandbox, not just inactive ones
        #[arg(long)]
        all: bool,

        /// Swallow per-sandbox cleanup failures
        #[arg(long)]
        force: bool,
    },

    /// Show container logs for a sandbox
    #[command(name = "logs")]
    Logs {
        /// The sandbox id
        #[arg(required = true)]
        id: String,

        /// Keep streaming new output
        #[arg(short = 'f', long)]
        follow: bool,

        /// How many trailing lines to show
        #[arg(long, default_value_t = 100)]
        tail: usize,
    },
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_flags_parse() {
        let args = DcsandboxArgs::parse_from([
            "dcsandbox",
            "create",
            "--git",
            "https://example.com/acme/widget.git",
            "--branch",
            "dev",
            "--name",
            "widget",
            "--template",
            "node",
            "--memory",
            "2G",
            "--cpu",
            "2",
            "--timeout",
            "120",
            "--persist",
            "--auto-detect",
            "--detach",
        ]);

        let Some(DcsandboxSubcommand::Create {
            git,
            branch,
            name,
            template,
            memory,
            cpu,
            timeout,
            persist,
            auto_detect,
            detach,
        }) = args.subcommand
        else {
            panic!("expected create");
        };

        assert_eq!(git.as_deref(), Some("https://example.com/acme/widget.git"));
        assert_eq!(branch, "dev");
        assert_eq!(name.as_deref(), Some("widget"));
        assert_eq!(template.as_deref(), Some("node"));
        assert_eq!(memory.as_deref(), Some("2G"));
        assert_eq!(cpu, Some(2.0));
        assert_eq!(timeout, Some(120));
        assert!(persist);
        assert!(auto_detect);
        assert!(detach);
    }

    #[test]
    fn test_branch_defaults_to_main() {
        let args = DcsandboxArgs::parse_from(["dcsandbox", "create"]);
        let Some(DcsandboxSubcommand::Create { branch, .. }) = args.subcommand else {
            panic!("expected create");
        };
        assert_eq!(branch, "main");
    }

    #[test]
    fn test_logs_tail_defaults_to_100() {
        let args = DcsandboxArgs::parse_from(["dcsandbox", "logs", "ab12cd34ef"]);
        let Some(DcsandboxSubcommand::Logs { tail, follow, .. }) = args.subcommand else {
            panic!("expected logs");
        };
        assert_eq!(tail, 100);
        assert!(!follow);
    }
}
