//! Hardware microphone and speaker binding

mod enumerator;
mod stream;

pub use enumerator::{list_devices, DeviceInfo, DeviceKind};
pub use stream::{MicrophoneStream, SpeakerStream};
