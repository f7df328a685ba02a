pub mod events;
pub mod host;
pub mod plugin;
pub mod settings;

// Public library API - hosts built on jam-core should only need these.
pub use events::{EventSink, HostEvent, TracingSink};
pub use host::{Host, HostOutcome};
pub use plugin::native::NativeLoader;
pub use plugin::{ControlDiscovery, ControlSession, DispatchTable};
pub use settings::{Settings, SettingsManager};
