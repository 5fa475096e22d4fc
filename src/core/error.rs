use crate::core::family::Family;
use crate::core::plan::PlanError;
use crate::elevation::ElevationError;
use strum::{Display, EnumIter};
use thiserror::Error;

/// Core error types for chainrot
#[derive(Debug, Error)]
pub enum Error {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A rotation invariant was violated before any engine mutation
    #[error("Precondition failed: {0}")]
    Precondition(#[from] PreconditionError),

    /// The engine refused to bootstrap `_live` or create `_new`
    #[error("Failed to prepare {family} chain {chain}: {source}")]
    Open {
        family: Family,
        chain: String,
        source: EngineError,
    },

    /// The engine rejected a rule appended to `_new`
    #[error("Rule rejected while populating {family} chain {chain}: {source}")]
    Populate {
        family: Family,
        chain: String,
        source: EngineError,
    },

    /// One of the five close steps failed
    #[error("{family} close step {step} failed on {chain}: {source} ({radius})", radius = .step.blast_radius())]
    Close {
        family: Family,
        step: CloseStep,
        chain: String,
        source: EngineError,
    },

    /// Engine failure outside a rotation (inventory, dry-run seeding)
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Rotation plan could not be loaded
    #[error("Plan error: {0}")]
    Plan(#[from] PlanError),

    /// Internal logic error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Invariant violations detected by the tracker or the open sanity checks.
///
/// None of these leave a mutation behind in the engine.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PreconditionError {
    #[error("rotation of {name} ({family}) is already open; close it before opening again")]
    AlreadyOpen { name: String, family: Family },

    #[error("jump chain {name} does not exist in {family}; provision it before rotating")]
    MissingJumpChain { name: String, family: Family },

    #[error(
        "stale chain {chain} exists in {family}: a previous rotation did not finish, inspect and remove it manually"
    )]
    StaleOld { chain: String, family: Family },

    #[error(
        "stale chain {chain} exists in {family}: a previous rotation did not finish, inspect and remove it manually"
    )]
    StaleNew { chain: String, family: Family },

    #[error("no rotation of {name} is open in {family}")]
    NotOpen { name: String, family: Family },

    #[error("rotation of {name} ({family}) already failed and cannot continue; inspect {name}_new manually")]
    RotationFailed { name: String, family: Family },
}

/// Errors reported by a rule-engine adapter
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("chain {0} does not exist")]
    NoSuchChain(String),

    #[error("chain {0} already exists")]
    ChainExists(String),

    #[error("chain {0} is still referenced")]
    ChainInUse(String),

    #[error("chain {0} is not empty")]
    ChainNotEmpty(String),

    #[error("rule rejected by {chain}: {message}")]
    Rejected { chain: String, message: String },

    /// Engine binary ran and exited unsuccessfully
    #[error("{program} failed: {stderr}")]
    Command {
        program: String,
        args: Vec<String>,
        stderr: String,
        exit_code: Option<i32>,
    },

    /// Engine binary could not be started
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("privilege elevation unavailable: {0}")]
    Elevation(#[from] ElevationError),
}

impl EngineError {
    /// Raw engine diagnostics, when the failure came from the engine binary
    pub fn stderr(&self) -> Option<&str> {
        match self {
            EngineError::Command { stderr, .. } => Some(stderr),
            EngineError::Rejected { message, .. } => Some(message),
            _ => None,
        }
    }
}

/// The five steps of closing a rotation, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter)]
pub enum CloseStep {
    #[strum(to_string = "1/5 (insert jump to new generation)")]
    InsertJump,
    #[strum(to_string = "2/5 (rename live to old)")]
    RetireLive,
    #[strum(to_string = "3/5 (rename new to live)")]
    PromoteNew,
    #[strum(to_string = "4/5 (remove jump to old generation)")]
    RemoveOldJump,
    #[strum(to_string = "5/5 (flush and delete old generation)")]
    DeleteOld,
}

impl CloseStep {
    /// Engine state left behind when this step fails
    pub fn blast_radius(self) -> &'static str {
        match self {
            CloseStep::InsertJump => {
                "previous live generation still active, new generation populated but unreferenced"
            }
            CloseStep::RetireLive => {
                "new generation already evaluated ahead of the previous live generation"
            }
            CloseStep::PromoteNew => {
                "new generation active under its _new name, previous generation renamed to _old"
            }
            CloseStep::RemoveOldJump => {
                "new generation live, jump to the retired _old generation still present"
            }
            CloseStep::DeleteOld => "new generation live, orphaned _old chain left behind",
        }
    }
}

/// Represents a translated error with helpful context
#[derive(Debug, Clone)]
pub struct ErrorTranslation {
    pub user_message: String,
    pub suggestions: Vec<String>,
    pub help_url: Option<String>,
}

impl ErrorTranslation {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            user_message: message.into(),
            suggestions: Vec::new(),
            help_url: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn with_help(mut self, url: impl Into<String>) -> Self {
        self.help_url = Some(url.into());
        self
    }
}

/// Database of iptables error patterns and their translations
pub struct IptablesErrorPattern;

impl IptablesErrorPattern {
    /// Matches an engine error message against known patterns and returns an
    /// operator-friendly translation.
    pub fn match_error(msg: &str) -> ErrorTranslation {
        let lower = msg.to_lowercase();

        // Permission errors
        if lower.contains("permission denied") || lower.contains("operation not permitted") {
            return ErrorTranslation::new("Insufficient permissions to modify firewall chains")
                .with_suggestion("Run chainrot as root or allow sudo/run0 for iptables")
                .with_suggestion("Check if CAP_NET_ADMIN capability is available")
                .with_suggestion("Force an elevation method: CHAINROT_ELEVATION_METHOD=sudo");
        }

        // xtables lock contention
        if lower.contains("xtables lock") {
            return ErrorTranslation::new("Another process is holding the xtables lock")
                .with_suggestion("Enable wait_for_lock in the config so iptables waits with -w")
                .with_suggestion(
                    "Check for concurrent firewall managers: sudo systemctl status firewalld ufw",
                );
        }

        // Rule syntax errors
        if lower.contains("bad argument")
            || lower.contains("unknown option")
            || lower.contains("couldn't load")
            || lower.contains("invalid port")
            || lower.contains("try `iptables -h'")
            || lower.contains("try `ip6tables -h'")
        {
            return ErrorTranslation::new("Invalid firewall rule syntax")
                .with_suggestion("Check the rule spec in your plan for typos")
                .with_suggestion("Verify that match and target modules are available in the kernel")
                .with_suggestion("The live generation was not changed; fix the rule and rerun")
                .with_help("https://man7.org/linux/man-pages/man8/iptables.8.html");
        }

        // Missing binary
        if lower.contains("no such file") || lower.contains("command not found") {
            return ErrorTranslation::new("iptables is not installed or not found in PATH")
                .with_suggestion("Install iptables: sudo apt install iptables  (Debian/Ubuntu)")
                .with_suggestion("Or: sudo dnf install iptables  (Fedora/RHEL)")
                .with_suggestion("Or set iptables_path / ip6tables_path in the chainrot config");
        }

        // Chain or target not found
        if lower.contains("no chain/target/match by that name") {
            return ErrorTranslation::new("Firewall chain or jump target not found")
                .with_suggestion("Ensure the jump chain exists before rotating")
                .with_suggestion("Rule targets must name existing chains or built-in verdicts")
                .with_help("https://man7.org/linux/man-pages/man8/iptables.8.html");
        }

        // Duplicate chain
        if lower.contains("chain already exists") {
            return ErrorTranslation::new("Firewall chain already exists")
                .with_suggestion("A previous rotation may have crashed mid-flight")
                .with_suggestion("Inspect with: chainrot status <name>");
        }

        // Chain still referenced or not empty
        if lower.contains("too many links")
            || lower.contains("resource busy")
            || lower.contains("directory not empty")
        {
            return ErrorTranslation::new("Firewall chain is still referenced or not empty")
                .with_suggestion("Another rule still jumps to this chain")
                .with_suggestion("List references with: iptables -S | grep -- '-j <chain>'")
                .with_suggestion("Remove the reference manually, then flush and delete the chain");
        }

        // Table or kernel module missing
        if lower.contains("can't initialize") || lower.contains("table does not exist") {
            return ErrorTranslation::new("Firewall table not available in the kernel")
                .with_suggestion("Check the configured table name (default: filter)")
                .with_suggestion("Load the kernel module: sudo modprobe ip_tables (or ip6_tables)");
        }

        // Generic fallback
        ErrorTranslation::new(format!("Firewall error: {msg}"))
            .with_suggestion("Check the detailed error message for more information")
            .with_suggestion("Verify iptables is working: sudo iptables -S")
            .with_help("https://man7.org/linux/man-pages/man8/iptables.8.html")
    }
}

impl Error {
    /// Operator guidance for this failure
    pub fn translate(&self) -> ErrorTranslation {
        match self {
            Error::Precondition(e) => match e {
                PreconditionError::StaleOld { chain, .. }
                | PreconditionError::StaleNew { chain, .. } => {
                    ErrorTranslation::new(format!("Stale chain {chain} blocks a new rotation"))
                        .with_suggestion("Inspect its contents: iptables -S <chain>")
                        .with_suggestion(
                            "If it is leftover residue: iptables -F <chain> && iptables -X <chain>",
                        )
                        .with_suggestion("Then rerun the rotation")
                }
                PreconditionError::MissingJumpChain { name, .. } => ErrorTranslation::new(
                    format!("Jump chain {name} must exist before rotating"),
                )
                .with_suggestion(format!(
                    "Create it and route traffic into it: iptables -N {name}"
                ))
                .with_suggestion(format!(
                    "Then reference the live generation: iptables -A {name} -j {name}_live"
                )),
                _ => ErrorTranslation::new(e.to_string())
                    .with_suggestion("This is a sequencing error in the calling plan or script"),
            },
            Error::Close { step, .. } => {
                let translation = self.engine_stderr().map_or_else(
                    || ErrorTranslation::new(self.to_string()),
                    IptablesErrorPattern::match_error,
                );
                translation
                    .with_suggestion(format!("Engine state: {}", step.blast_radius()))
                    .with_suggestion("No rollback was attempted; repair the chains manually")
            }
            _ => self.engine_stderr().map_or_else(
                || ErrorTranslation::new(self.to_string()),
                IptablesErrorPattern::match_error,
            ),
        }
    }

    fn engine_stderr(&self) -> Option<&str> {
        match self {
            Error::Open { source, .. }
            | Error::Populate { source, .. }
            | Error::Close { source, .. }
            | Error::Engine(source) => source.stderr(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
