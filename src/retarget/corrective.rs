use super::types::ScaleFactors;
use crate::error::{RigError, RigResult};
use crate::rig::{CHANNELS_PER_JOINT, RigArchive};

/// Rescales the driver coefficients of every joint group that drives `joint`.
///
/// Only the outputs addressing this joint's nine channels are touched. Each
/// output row `p` spans `values[p * inputs .. (p + 1) * inputs]` and is
/// multiplied by the channel multiplier of its output index.
///
/// Returns the number of joint groups rewritten.
pub fn rescale_joint_group_drivers(archive: &mut RigArchive, joint: usize, factors: ScaleFactors) -> RigResult<usize> {
    let joint_id = u16::try_from(joint)
        .map_err(|_| RigError::precondition(format!("joint index {joint} exceeds the archive range")))?;
    let first_output = joint as u32 * CHANNELS_PER_JOINT as u32;
    let outputs = first_output..first_output + CHANNELS_PER_JOINT as u32;
    let multipliers = factors.channel_multipliers();

    let mut rewritten = 0;
    for group in 0..archive.joint_group_count() {
        let Some(data) = archive.joint_group(group) else {
            continue;
        };
        if !data.drives_joint(joint_id) {
            continue;
        }
        let input_count = data.input_count();
        if data.values.len() != input_count * data.output_indices.len() {
            return Err(RigError::precondition(format!(
                "joint group {group} holds {} values for {} inputs x {} outputs",
                data.values.len(),
                input_count,
                data.output_indices.len()
            )));
        }

        let mut values = data.values.clone();
        for (position, &output) in data.output_indices.iter().enumerate() {
            let output = output as u32;
            if !outputs.contains(&output) {
                continue;
            }
            let multiplier = multipliers[(output % CHANNELS_PER_JOINT as u32) as usize];
            let row = position * input_count..(position + 1) * input_count;
            for value in &mut values[row] {
                *value = (*value as f64 * multiplier) as f32;
            }
        }
        archive.set_joint_group_values(group, values)?;
        rewritten += 1;
    }
    Ok(rewritten)
}
