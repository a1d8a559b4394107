//! Static data-flow graph of the fusion network.
//!
//! The topology never changes; only the channel count attached to each node
//! depends on the base channels and the width multiplier. Every formula is
//! written out per node; several of them (`2 x Mid`, `4 x Mid`, `Mid / 2`)
//! do not follow from the level ratios.

use std::fmt;

use serde::Serialize;

use crate::error::{DetectError, Result};
use crate::model::level::{scaled, ScaleLevel};

/// A tensor in the fusion graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Node {
    InputHigh,
    InputMid,
    InputLow,
    GatedHigh,
    GatedMid,
    GatedLow,
    LowUp,
    MidProcess,
    MidUp,
    HighRaw,
    MidDown,
    HighDown,
    MidRaw,
    LowRaw,
    OutHigh,
    OutMid,
    OutLow,
}

impl Node {
    pub const COUNT: usize = 17;

    pub const ALL: [Node; Node::COUNT] = [
        Node::InputHigh,
        Node::InputMid,
        Node::InputLow,
        Node::GatedHigh,
        Node::GatedMid,
        Node::GatedLow,
        Node::LowUp,
        Node::MidProcess,
        Node::MidUp,
        Node::HighRaw,
        Node::MidDown,
        Node::HighDown,
        Node::MidRaw,
        Node::LowRaw,
        Node::OutHigh,
        Node::OutMid,
        Node::OutLow,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn input(level: ScaleLevel) -> Node {
        match level {
            ScaleLevel::High => Node::InputHigh,
            ScaleLevel::Mid => Node::InputMid,
            ScaleLevel::Low => Node::InputLow,
        }
    }

    pub fn output(level: ScaleLevel) -> Node {
        match level {
            ScaleLevel::High => Node::OutHigh,
            ScaleLevel::Mid => Node::OutMid,
            ScaleLevel::Low => Node::OutLow,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Node::InputHigh => "input_high",
            Node::InputMid => "input_mid",
            Node::InputLow => "input_low",
            Node::GatedHigh => "gated_high",
            Node::GatedMid => "gated_mid",
            Node::GatedLow => "gated_low",
            Node::LowUp => "low_up",
            Node::MidProcess => "mid_process",
            Node::MidUp => "mid_up",
            Node::HighRaw => "high_raw",
            Node::MidDown => "mid_down",
            Node::HighDown => "high_down",
            Node::MidRaw => "mid_raw",
            Node::LowRaw => "low_raw",
            Node::OutHigh => "out_high",
            Node::OutMid => "out_mid",
            Node::OutLow => "out_low",
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Operator attached to a graph edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
    Gate(ScaleLevel),
    UpsampleLowToMid,
    UpsampleMidToHigh,
    DownsampleMidToLow,
    DownsampleHighToMid,
    Concat,
    Resize(ScaleLevel),
}

impl OpKind {
    /// Spatial factor the operator applies: 2 = doubles, -2 = halves.
    pub fn spatial_factor(self) -> i32 {
        match self {
            OpKind::UpsampleLowToMid | OpKind::UpsampleMidToHigh => 2,
            OpKind::DownsampleMidToLow | OpKind::DownsampleHighToMid => -2,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Step {
    pub op: OpKind,
    pub inputs: &'static [Node],
    pub output: Node,
}

/// Evaluation order. Each step only reads nodes produced by earlier steps.
pub const STEPS: [Step; 14] = [
    Step { op: OpKind::Gate(ScaleLevel::High), inputs: &[Node::InputHigh], output: Node::GatedHigh },
    Step { op: OpKind::Gate(ScaleLevel::Mid), inputs: &[Node::InputMid], output: Node::GatedMid },
    Step { op: OpKind::Gate(ScaleLevel::Low), inputs: &[Node::InputLow], output: Node::GatedLow },
    // top-down
    Step { op: OpKind::UpsampleLowToMid, inputs: &[Node::GatedLow], output: Node::LowUp },
    Step { op: OpKind::Concat, inputs: &[Node::GatedMid, Node::LowUp], output: Node::MidProcess },
    Step { op: OpKind::UpsampleMidToHigh, inputs: &[Node::MidProcess], output: Node::MidUp },
    Step { op: OpKind::Concat, inputs: &[Node::GatedHigh, Node::MidUp], output: Node::HighRaw },
    // bottom-up
    Step { op: OpKind::DownsampleMidToLow, inputs: &[Node::MidProcess], output: Node::MidDown },
    Step { op: OpKind::DownsampleHighToMid, inputs: &[Node::HighRaw], output: Node::HighDown },
    Step { op: OpKind::Concat, inputs: &[Node::HighDown, Node::MidProcess], output: Node::MidRaw },
    Step { op: OpKind::Concat, inputs: &[Node::GatedLow, Node::MidDown], output: Node::LowRaw },
    Step { op: OpKind::Resize(ScaleLevel::High), inputs: &[Node::HighRaw], output: Node::OutHigh },
    Step { op: OpKind::Resize(ScaleLevel::Mid), inputs: &[Node::MidRaw], output: Node::OutMid },
    Step { op: OpKind::Resize(ScaleLevel::Low), inputs: &[Node::LowRaw], output: Node::OutLow },
];

/// Channel count of every node for one (base channels, width) pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FusionPlan {
    pub base: [usize; 3],
    pub width: f64,
    channels: [usize; Node::COUNT],
}

impl FusionPlan {
    pub fn new(base: [usize; 3], width: f64) -> Self {
        let [high, mid, low] = base;
        let s = |c: usize| scaled(c, width);

        let mut channels = [0; Node::COUNT];
        let mut set = |node: Node, value: usize| channels[node.index()] = value;

        set(Node::InputHigh, s(high));
        set(Node::InputMid, s(mid));
        set(Node::InputLow, s(low));
        set(Node::GatedHigh, s(high));
        set(Node::GatedMid, s(mid));
        set(Node::GatedLow, s(low));
        set(Node::LowUp, s(mid));
        set(Node::MidProcess, s(2 * mid));
        set(Node::MidUp, s(mid / 2));
        set(Node::HighRaw, s(2 * high));
        set(Node::MidDown, s(low));
        set(Node::HighDown, s(2 * mid));
        set(Node::MidRaw, s(4 * mid));
        set(Node::LowRaw, s(2 * low));
        set(Node::OutHigh, s(high));
        set(Node::OutMid, s(mid));
        set(Node::OutLow, s(low));

        Self { base, width, channels }
    }

    pub fn channels(&self, node: Node) -> usize {
        self.channels[node.index()]
    }

    pub fn level_channels(&self, level: ScaleLevel) -> usize {
        self.channels(Node::output(level))
    }

    /// Input channels an operator step must be built with.
    pub fn step_in_channels(&self, step: &Step) -> usize {
        step.inputs.iter().map(|n| self.channels(*n)).sum()
    }

    /// Check the static graph: every node is non-empty, produced before it
    /// is read, and every concatenation's operands add up to its output.
    pub fn validate(&self) -> Result<()> {
        for node in Node::ALL {
            if self.channels(node) == 0 {
                return Err(DetectError::InvalidConfig(format!(
                    "fusion node {node} has zero channels at width {}",
                    self.width
                )));
            }
        }

        let mut produced = [false; Node::COUNT];
        for level in ScaleLevel::ALL {
            produced[Node::input(level).index()] = true;
        }

        for step in &STEPS {
            for input in step.inputs {
                if !produced[input.index()] {
                    return Err(DetectError::InvalidConfig(format!(
                        "fusion node {input} is read before it is produced"
                    )));
                }
            }

            let expected = self.channels(step.output);
            let actual = self.step_in_channels(step);
            let preserves_channels = matches!(step.op, OpKind::Gate(_) | OpKind::Concat);
            if preserves_channels && actual != expected {
                return Err(DetectError::channels(site(step), expected, actual));
            }

            produced[step.output.index()] = true;
        }

        Ok(())
    }

    /// One line per step, for logs and the CLI summary.
    pub fn describe(&self) -> Vec<String> {
        STEPS
            .iter()
            .map(|step| {
                let inputs: Vec<String> = step
                    .inputs
                    .iter()
                    .map(|n| format!("{n}({})", self.channels(*n)))
                    .collect();
                format!(
                    "{:?}: {} -> {}({})",
                    step.op,
                    inputs.join(" + "),
                    step.output,
                    self.channels(step.output)
                )
            })
            .collect()
    }
}

pub(crate) fn site(step: &Step) -> String {
    let inputs: Vec<&str> = step.inputs.iter().map(|n| n.name()).collect();
    format!("{:?}({}) -> {}", step.op, inputs.join(", "), step.output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::level::BASE_CHANNELS;
    use crate::model::profile::PROFILES;

    #[test]
    fn test_node_indices_match_all_order() {
        for (i, node) in Node::ALL.iter().enumerate() {
            assert_eq!(node.index(), i);
        }
    }

    #[test]
    fn test_base_width_channel_table() {
        let plan = FusionPlan::new(BASE_CHANNELS, 1.0);

        assert_eq!(plan.channels(Node::LowUp), 512);
        assert_eq!(plan.channels(Node::MidProcess), 1024);
        assert_eq!(plan.channels(Node::MidUp), 256);
        assert_eq!(plan.channels(Node::HighRaw), 512);
        assert_eq!(plan.channels(Node::MidDown), 1024);
        assert_eq!(plan.channels(Node::HighDown), 1024);
        assert_eq!(plan.channels(Node::MidRaw), 2048);
        assert_eq!(plan.channels(Node::LowRaw), 2048);
        assert_eq!(plan.level_channels(ScaleLevel::High), 256);
        assert_eq!(plan.level_channels(ScaleLevel::Mid), 512);
        assert_eq!(plan.level_channels(ScaleLevel::Low), 1024);
    }

    #[test]
    fn test_every_profile_width_validates() {
        for profile in PROFILES {
            let plan = FusionPlan::new(BASE_CHANNELS, profile.width);
            plan.validate().unwrap_or_else(|e| panic!("{}: {e}", profile.name));
        }
    }

    #[test]
    fn test_custom_base_channels_fail_at_high_concat() {
        // High != Mid / 2 breaks the gated_high + mid_up concatenation.
        let plan = FusionPlan::new([128, 512, 1024], 1.0);
        let err = plan.validate().unwrap_err();

        match err {
            DetectError::WrongChannelConfig { site, expected, actual } => {
                assert!(site.ends_with("high_raw"), "{site}");
                assert_eq!(expected, 256);
                assert_eq!(actual, 128 + 256);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_tiny_width_rejected() {
        let plan = FusionPlan::new(BASE_CHANNELS, 0.001);
        assert!(matches!(plan.validate(), Err(DetectError::InvalidConfig(_))));
    }

    #[test]
    fn test_describe_lists_every_step() {
        let plan = FusionPlan::new(BASE_CHANNELS, 0.5);
        let lines = plan.describe();

        assert_eq!(lines.len(), STEPS.len());
        assert!(lines[4].contains("mid_process(512)"));
    }
}
