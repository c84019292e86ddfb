pub mod address;
pub mod backoff;
pub mod bus;
pub mod config;
pub mod display;
pub mod error;
pub mod link;
pub mod messages;
pub mod prefs;
pub mod publish;
pub mod registry;
pub mod relay;
pub mod schedule;
pub mod topics;
pub mod types;

pub use address::DeviceAddress;
pub use backoff::{ReconnectBackoff, RetryPolicy};
pub use bus::{usable_reading, BusState, OneWireBus};
pub use config::{BusBackend, RuntimeConfig};
pub use display::{DisplaySelector, DisplaySink, DisplayUpdate, DisplayView};
pub use error::{AddressError, BusError, PrefsError, SubmitError};
pub use link::{LinkState, LinkSupervisor};
pub use messages::TaskMessage;
pub use prefs::{MemoryPreferenceStore, PrefValue, PreferenceStore, Preferences};
pub use publish::{plan_cycle, Pacing, PublishStep, PublishTransport};
pub use registry::{CollectReport, MergeReport, SensorRecord, SensorRegistry};
pub use relay::{RelayBank, RelayId, RelayOutputs, RelayState, RELAY_COUNT};
pub use schedule::{AcquisitionSchedule, AcquisitionStep, IntervalTimer};
pub use topics::Topics;
pub use types::{HealthSnapshot, HubStatus, RelayView, SensorView};
