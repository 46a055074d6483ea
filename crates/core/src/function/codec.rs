//! Persisted encodings of [`ChaserStep`].
//!
//! Steps have one in-memory form and two wire forms: a `<Step>` XML element
//! and a flat four-element value list. Both live behind [`StepCodec`] so a
//! further format only needs a new adapter.
//!
//! ```xml
//! <Step Number="0" FadeIn="500" FadeOut="250" Duration="1000">12</Step>
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ChaserStep, FunctionId};
use crate::{LightEngineError, Result};

pub const STEP_TAG: &str = "Step";
pub const STEP_LIST_TAG: &str = "Steps";

/// Converts steps to and from one wire representation.
pub trait StepCodec {
    type Encoded;

    /// Encodes `step` as the `ordinal`-th entry of its sequence.
    fn encode(&self, step: &ChaserStep, ordinal: usize) -> Result<Self::Encoded>;

    fn decode(&self, encoded: &Self::Encoded) -> Result<ChaserStep>;
}

/// Attributes are kept as raw strings so malformed numbers can fall back to
/// zero instead of rejecting the whole element.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StepElement {
    #[serde(rename = "@Number", default, skip_serializing_if = "Option::is_none")]
    number: Option<String>,
    #[serde(rename = "@FadeIn", default, skip_serializing_if = "Option::is_none")]
    fade_in: Option<String>,
    #[serde(rename = "@FadeOut", default, skip_serializing_if = "Option::is_none")]
    fade_out: Option<String>,
    #[serde(rename = "@Duration", default, skip_serializing_if = "Option::is_none")]
    duration: Option<String>,
    #[serde(rename = "$text", default, skip_serializing_if = "Option::is_none")]
    function: Option<String>,
}

impl StepElement {
    fn from_step(step: &ChaserStep, ordinal: usize) -> Self {
        Self {
            number: Some(ordinal.to_string()),
            fade_in: Some(step.fade_in_ms.to_string()),
            fade_out: Some(step.fade_out_ms.to_string()),
            duration: Some(step.duration_ms.to_string()),
            function: Some(step.function.0.to_string()),
        }
    }

    fn to_step(&self) -> ChaserStep {
        ChaserStep {
            function: FunctionId(lenient_u32(&self.function)),
            fade_in_ms: lenient_u32(&self.fade_in),
            fade_out_ms: lenient_u32(&self.fade_out),
            duration_ms: lenient_u32(&self.duration),
        }
    }

    fn ordinal(&self) -> Option<i64> {
        self.number.as_deref()?.trim().parse().ok()
    }
}

/// Root element check: only a `<Step>` element is accepted.
#[derive(Debug, Deserialize)]
enum StepDocument {
    Step(StepElement),
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StepListElement {
    #[serde(rename = "Step", default)]
    steps: Vec<StepElement>,
}

fn lenient_u32(raw: &Option<String>) -> u32 {
    raw.as_deref()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0)
}

fn xml_error(err: impl std::fmt::Display) -> LightEngineError {
    LightEngineError::Xml(err.to_string())
}

/// `<Step Number=".." FadeIn=".." FadeOut=".." Duration="..">id</Step>`
#[derive(Debug, Default, Clone, Copy)]
pub struct XmlStepCodec;

impl XmlStepCodec {
    /// Decodes a step along with its advisory ordinal, if the element has one.
    pub fn decode_with_ordinal(&self, xml: &str) -> Result<(ChaserStep, Option<i64>)> {
        let StepDocument::Step(element) = quick_xml::de::from_str(xml).map_err(xml_error)?;
        Ok((element.to_step(), element.ordinal()))
    }
}

impl StepCodec for XmlStepCodec {
    type Encoded = String;

    fn encode(&self, step: &ChaserStep, ordinal: usize) -> Result<String> {
        quick_xml::se::to_string_with_root(STEP_TAG, &StepElement::from_step(step, ordinal))
            .map_err(xml_error)
    }

    fn decode(&self, encoded: &String) -> Result<ChaserStep> {
        self.decode_with_ordinal(encoded).map(|(step, _)| step)
    }
}

/// `[function, fade_in, fade_out, duration]`
#[derive(Debug, Default, Clone, Copy)]
pub struct VariantStepCodec;

impl StepCodec for VariantStepCodec {
    type Encoded = Value;

    fn encode(&self, step: &ChaserStep, _ordinal: usize) -> Result<Value> {
        Ok(Value::Array(vec![
            step.function.0.into(),
            step.fade_in_ms.into(),
            step.fade_out_ms.into(),
            step.duration_ms.into(),
        ]))
    }

    /// Anything other than a four-element list decodes to a zeroed step.
    fn decode(&self, encoded: &Value) -> Result<ChaserStep> {
        let field = |value: &Value| {
            value
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(0)
        };
        Ok(match encoded.as_array().map(Vec::as_slice) {
            Some([function, fade_in, fade_out, duration]) => ChaserStep {
                function: FunctionId(field(function)),
                fade_in_ms: field(fade_in),
                fade_out_ms: field(fade_out),
                duration_ms: field(duration),
            },
            _ => ChaserStep::default(),
        })
    }
}

/// Writes a step sequence as `<Steps>` with ordinals taken from list order.
pub fn encode_steps_xml(steps: &[ChaserStep]) -> Result<String> {
    let list = StepListElement {
        steps: steps
            .iter()
            .enumerate()
            .map(|(ordinal, step)| StepElement::from_step(step, ordinal))
            .collect(),
    };
    quick_xml::se::to_string_with_root(STEP_LIST_TAG, &list).map_err(xml_error)
}

/// Reads a step sequence in document order. `Number` attributes are ignored.
pub fn decode_steps_xml(xml: &str) -> Result<Vec<ChaserStep>> {
    let list: StepListElement = quick_xml::de::from_str(xml).map_err(xml_error)?;
    Ok(list.steps.iter().map(StepElement::to_step).collect())
}
