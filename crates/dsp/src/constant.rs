use engine_graph::{Module, ModuleClass, ProcessContext};

/// Emits one fixed value per output stream.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstantModule {
    values: Vec<f32>,
}

impl ConstantModule {
    pub fn new(values: impl Into<Vec<f32>>) -> Self {
        Self {
            values: values.into(),
        }
    }

    pub fn single(value: f32) -> Self {
        Self::new(vec![value])
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn set_value(&mut self, ostream: usize, value: f32) {
        if let Some(slot) = self.values.get_mut(ostream) {
            *slot = value;
        }
    }
}

impl Module for ConstantModule {
    fn class(&self) -> ModuleClass {
        ModuleClass::new(0, 0, self.values.len())
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) {
        for (ostream, value) in self.values.iter().enumerate() {
            ctx.outputs.ostream(ostream).fill(*value);
        }
    }
}
