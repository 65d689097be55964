//! Event-driven pipeline components of the haptic ingress controller.
//!
//! Every component here is a long-lived task wired exclusively through the
//! event bus: it subscribes in its constructor (before the bus starts, when
//! wired by the binary), then runs a `select!` loop over its subscription
//! and a cancellation token. There are no direct component-to-component
//! calls; errors become `…invalid` / `…failed` events instead of crossing
//! task boundaries.
//!
//! The deployment write path (scheduler, deployer, drift monitor) is
//! leader-only and runs under a child cancellation scope owned by the
//! leader election adapter's hooks; everything else is warm standby.

pub mod check;
pub mod credentials;
pub mod deployer;
pub mod drift;
pub mod external;
pub mod leader;
pub mod loader;
pub mod render;
pub mod scheduler;
pub mod stub;
pub mod validation;

pub use check::RenderedChecker;
pub use credentials::CredentialsLoader;
pub use deployer::Deployer;
pub use drift::DriftMonitor;
pub use external::{
    ApplyError, CheckErrors, DataplaneClient, IndexSnapshot, ResourceIndex, SyncResult,
    SyntaxChecker, TemplateEngine, TemplateError,
};
pub use leader::{LeaderElectionAdapter, LeaderHooks, LeaseState};
pub use loader::ConfigLoader;
pub use render::Renderer;
pub use scheduler::{DeploymentScheduler, SchedulerView};
pub use validation::{
    BasicValidator, ConfigValidator, DryRunValidator, JsonPathValidator, TemplateValidator,
    ValidationCoordinator, ValidatorHost,
};
