use crate::fastmath::approx_qcircle4;
use engine_graph::{Module, ModuleClass, ProcessContext};

pub const ICHANNEL_AUDIO_IN1: usize = 0;
pub const ICHANNEL_AUDIO_IN2: usize = 1;
pub const ICHANNEL_CTRL_IN1: usize = 2;
pub const ICHANNEL_CTRL_IN2: usize = 3;
pub const OCHANNEL_AUDIO_OUT: usize = 0;

/// User-facing amplifier settings; levels are percentages.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AmplifierParams {
    pub alevel1: f64,
    pub alevel2: f64,
    pub clevel1: f64,
    pub clevel2: f64,
    /// Multiply both control inputs instead of summing them.
    pub ctrl_mul: bool,
    /// Shape the control sum with a quarter-circle curve.
    pub ctrl_exp: bool,
    pub ostrength: f64,
    pub base_level: f64,
    pub master_volume: f64,
}

impl Default for AmplifierParams {
    fn default() -> Self {
        Self {
            alevel1: 100.0,
            alevel2: 100.0,
            clevel1: 100.0,
            clevel2: 100.0,
            ctrl_mul: false,
            ctrl_exp: false,
            ostrength: 100.0,
            base_level: 0.0,
            master_volume: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Gains {
    al1: f64,
    al2: f64,
    cl1: f64,
    cl2: f64,
    ocs: f64,
    bl: f64,
    ctrl_mul: bool,
    ctrl_exp: bool,
}

impl From<&AmplifierParams> for Gains {
    fn from(params: &AmplifierParams) -> Self {
        let ocs = if params.ctrl_mul {
            params.ostrength * 0.01
        } else {
            params.ostrength * 0.5 * 0.01
        };
        Self {
            al1: params.alevel1 * 0.01 * params.master_volume,
            al2: params.alevel2 * 0.01 * params.master_volume,
            cl1: params.clevel1 * 0.01,
            cl2: params.clevel2 * 0.01,
            ocs,
            bl: params.base_level * 0.01,
            ctrl_mul: params.ctrl_mul,
            ctrl_exp: params.ctrl_exp,
        }
    }
}

#[derive(Clone, Copy)]
enum Control {
    Base,
    Balance,
    Multiply,
    First,
    Second,
}

/// Two-input VCA: audio inputs are mixed, then scaled by the control inputs
/// (or by the base level alone when no control input is connected).
pub struct Amplifier {
    params: AmplifierParams,
    gains: Gains,
}

impl Amplifier {
    pub const CLASS: ModuleClass = ModuleClass::new(4, 0, 1);

    pub fn new(params: AmplifierParams) -> Self {
        Self {
            gains: Gains::from(&params),
            params,
        }
    }

    pub fn params(&self) -> &AmplifierParams {
        &self.params
    }

    pub fn set_params(&mut self, params: AmplifierParams) {
        self.gains = Gains::from(&params);
        self.params = params;
    }

    fn control_value(&self, control: Control, c1: f32, c2: f32) -> f64 {
        let g = &self.gains;
        let mut sum = match control {
            Control::Base => return g.bl,
            Control::Balance => g.cl1 * c1 as f64 + g.cl2 * c2 as f64,
            Control::Multiply => {
                let (a, b) = (g.cl1 * c1 as f64, g.cl2 * c2 as f64);
                if a > 0.0 && b > 0.0 {
                    a * b
                } else {
                    0.0
                }
            }
            Control::First => g.cl1 * c1 as f64,
            Control::Second => g.cl2 * c2 as f64,
        };
        if sum < 0.0 {
            sum = 0.0;
        } else {
            sum *= g.ocs;
        }
        if g.ctrl_exp {
            sum = approx_qcircle4(sum);
        }
        (sum + g.bl).min(1.0)
    }
}

impl Module for Amplifier {
    fn class(&self) -> ModuleClass {
        Self::CLASS
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) {
        let inputs = &ctx.inputs;
        let out = ctx.outputs.ostream(OCHANNEL_AUDIO_OUT);
        let a1 = inputs.connected(ICHANNEL_AUDIO_IN1);
        let a2 = inputs.connected(ICHANNEL_AUDIO_IN2);
        if a1.is_none() && a2.is_none() {
            out.fill(0.0);
            return;
        }
        let control = match (
            inputs.is_connected(ICHANNEL_CTRL_IN1),
            inputs.is_connected(ICHANNEL_CTRL_IN2),
        ) {
            (true, true) if self.gains.ctrl_mul => Control::Multiply,
            (true, true) => Control::Balance,
            (true, false) => Control::First,
            (false, true) => Control::Second,
            (false, false) => Control::Base,
        };
        let a1 = a1.unwrap_or(inputs.zeros());
        let a2 = a2.unwrap_or(inputs.zeros());
        let c1 = inputs.istream(ICHANNEL_CTRL_IN1);
        let c2 = inputs.istream(ICHANNEL_CTRL_IN2);
        let (al1, al2) = (self.gains.al1, self.gains.al2);
        for (i, sample) in out.iter_mut().enumerate() {
            let audio = al1 * a1[i] as f64 + al2 * a2[i] as f64;
            *sample = (audio * self.control_value(control, c1[i], c2[i])) as f32;
        }
    }
}
