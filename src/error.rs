use thiserror::Error;

pub type SimResult<T> = Result<T, SimError>;

#[derive(Debug, Error)]
pub enum SimError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error(transparent)]
    Handler(#[from] HandlerError),

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Geo(#[from] GeoError),

    #[error(transparent)]
    Io(#[from] IoError),

    #[error(transparent)]
    System(#[from] SystemError),
}

/// Errors loading or validating the configuration document (§7 category 1: fatal at load).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write configuration file '{path}': {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration document: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("missing required configuration section: {0}")]
    MissingSection(String),

    #[error("unknown motion model type: '{0}'")]
    UnknownMotionModel(String),

    #[error("unknown payoff model type: '{0}'")]
    UnknownPayoffModel(String),

    #[error("unknown crossover operator: '{0}'")]
    UnknownCrossoverOp(String),

    #[error("unknown parent selection operator: '{0}'")]
    UnknownParentSelOp(String),

    #[error("unknown environment selection operator: '{0}'")]
    UnknownEnvironSelOp(String),

    #[error("unknown time type: '{0}'")]
    UnknownTimeType(String),

    #[error("invalid configuration value for '{field}': {msg}")]
    InvalidValue { field: String, msg: String },

    #[error("agent count mismatch: system.yml declares {declared} agents, loaded config has {found}")]
    AgentCountMismatch { declared: usize, found: usize },
}

/// Errors from the resource ledger (§4.2). Overrun/margin violations are logged and swallowed
/// at `consume()`; they are only fatal if they escape agent construction.
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("resource '{name}' would exceed its reserved margin (capacity {capacity}, reserved {reserved}, requested {requested})")]
    MarginExceeded {
        name: String,
        capacity: f64,
        reserved: f64,
        requested: f64,
    },

    #[error("resource '{name}' overran its maximum capacity during step() (consumed {consumed}, max {max})")]
    Overrun {
        name: String,
        consumed: f64,
        max: f64,
    },

    #[error("no consumption rate registered for owner '{0}' on resource '{1}'")]
    RateNotFound(String, String),

    #[error("negative consumption rate ({0}) rejected for resource '{1}'")]
    NegativeRate(f64, String),
}

/// Errors from the per-agent knowledge base (§4.6, §7 category 5).
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("activity handler for agent '{0}' has no owned activities")]
    EmptyOwned(String),

    #[error("overlapping owned activity interval: new [{new_start}, {new_end}) overlaps existing [{existing_start}, {existing_end})")]
    OverlappingOwned {
        new_start: f64,
        new_end: f64,
        existing_start: f64,
        existing_end: f64,
    },

    #[error("activity (owner={owner}, seq={seq}) not found")]
    NotFound { owner: String, seq: u64 },
}

/// Errors from the inter-satellite link protocol (§4.7, §7 category 4). These are refused and
/// logged without tearing down the connection.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("transfer {transfer_id} arrived in an invalid state: start time {start} is in the future of now={now}")]
    PrematureTransfer {
        transfer_id: u64,
        start: f64,
        now: f64,
    },

    #[error("cannot start transfer {0}: peer link is not connected")]
    NotConnected(u64),

    #[error("unknown peer '{0}' for this link")]
    UnknownPeer(String),
}

/// Errors from the GA scheduler (§4.8). An invalid chromosome is not an error per se (§4.10),
/// these are for scheduler misconfiguration / malformed candidate input.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("chromosome info requested for allele {idx} but only {len} alleles are configured")]
    AlleleOutOfRange { idx: usize, len: usize },

    #[error("scheduler was given zero candidate activities")]
    EmptyCandidateSet,

    #[error("mismatched allele lengths: t0s={t0}, t1s={t1}")]
    MismatchedAlleleLengths { t0: usize, t1: usize },
}

/// Errors from geodesy / instrument geometry (§4.3, §7 category 2): logged, frame skipped.
#[derive(Debug, Error)]
pub enum GeoError {
    #[error("slant range computation produced NaN for altitude {altitude} and off-nadir angle {angle}")]
    NanSlantRange { altitude: f64, angle: f64 },

    #[error("zero-magnitude vector while building footprint basis at sub-point ({lon}, {lat})")]
    DegenerateBasis { lon: f64, lat: f64 },

    #[error("aperture {requested} exceeds maximum usable aperture {max} for altitude {altitude}; clamped")]
    ApertureClamped {
        requested: f64,
        max: f64,
        altitude: f64,
    },
}

/// Errors from reporter / file I/O (§6 persisted state).
#[derive(Debug, Error)]
pub enum IoError {
    #[error("I/O operation failed")]
    Io(#[from] std::io::Error),

    #[error("CSV writer error")]
    Csv(#[from] csv::Error),

    #[error("failed to create output directory '{0}'")]
    CreateDir(String),
}

/// Errors for internal invariants that should be unreachable; surfacing one is a bug.
#[derive(Debug, Error)]
pub enum SystemError {
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("propagation failure for agent '{0}': next position missing")]
    PropagationFailure(String),

    #[error("index out of bounds: {0}")]
    IndexOutOfBounds(String),
}
