//! Seam CLI internal library code

/// Default gem source URL
pub const DEFAULT_GEM_SOURCE: &str = "https://rubygems.org";

/// Get the gem source URL to use for fetching gems.
/// Priority: `SEAM_GEM_SOURCE` env var -> `DEFAULT_GEM_SOURCE` constant.
#[must_use]
pub fn gem_source_url() -> String {
    env_vars::gem_source().unwrap_or_else(|| DEFAULT_GEM_SOURCE.to_string())
}

pub mod cache;
pub mod compact_index;
pub mod debug;
pub mod download;
pub mod env_vars;
pub mod environment;
pub mod extract;
pub mod gem_metadata;
pub mod gemfile;
pub mod install;
pub mod lockfile;
pub mod net;
pub mod paths;
pub mod progress;
pub mod range;
pub mod resolver;
pub mod version;

// Re-export common types for convenience
pub use cache::{Stats as CacheStats, collect_stats, human_bytes};
pub use compact_index::{CompactIndex, PackageEntry};
pub use debug::{debug_log, init_debug, is_debug_enabled};
pub use download::{DownloadError, DownloadManager, DownloadSpec, compute_checksum};
pub use environment::EnvironmentError;
pub use extract::{ExtractError, UnpackedGem};
pub use gemfile::{AutoRequire, EnvConstants, GemDeclaration, Gemfile, GemfileError};
pub use install::{InstallReport, Installer};
pub use lockfile::{Dependency, LockedGem, Lockfile, LockfileError};
pub use net::{HttpClient, NetError};
pub use progress::{MultiBar, ProgressMode};
pub use range::Range;
pub use resolver::{
    DependencyProvider, ProviderError, ResolvedGem, Resolver, ResolverError, StaticProvider,
};
pub use version::{Constraint, ConstraintSet, Version, VersionError};
