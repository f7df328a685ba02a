//! Native plugin ABI: the C contract between a jam host and a control plugin.
//!
//! **Security Note**: native plugins run with the full privileges of the host
//! process. Only scan directories that contain trusted libraries.
//!
//! ## Plugin ABI
//!
//! ```c
//! struct LibsInfo {
//!     const char* plugin_type;
//!     const char* product;
//!     const char* description_long;
//!     const char* description_short;
//!     uint64_t plugin_id;
//! };
//!
//! typedef const char* (*DispatchFn)(const char* address, const char* payload, const char* options);
//!
//! int Report(char* err_buf, size_t err_cap, struct LibsInfo* out);
//! int Attach(DispatchFn dispatch, char* err_buf, size_t err_cap);
//! const char* Invoke(const char* address, const char* payload, const char* options);
//! int Detach(char* err_buf, size_t err_cap);
//! ```
//!
//! Fallible calls return non-zero on success and write a NUL-terminated
//! diagnostic of at most `err_cap - 1` bytes into `err_buf` on failure.

pub mod abi;
pub mod error_buffer;
pub mod export;
pub mod loader;

pub use abi::{LibsInfo, PluginDescriptor, CONTROL_PLUGIN_TYPE, ERROR_BUFFER_CAPACITY};
pub use error_buffer::ErrorBuffer;
pub use export::{Dispatcher, NativePlugin, StaticDescriptor};
pub use loader::{validate, ControlExports, LibraryLoader, LoadedLibrary, NativeLoader, PluginLibrary};
