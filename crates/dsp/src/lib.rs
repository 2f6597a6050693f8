pub mod amplifier;
pub mod constant;
pub mod fastmath;
pub mod oscillator;
pub mod wavetable;

pub use amplifier::{Amplifier, AmplifierParams};
pub use constant::ConstantModule;
pub use oscillator::{
    output_sync, FmMode, OscConfig, OscInputs, OscMode, OscState, Oscillator, OscillatorModule,
};
pub use wavetable::{OscTable, OscWave, WaveForm};
