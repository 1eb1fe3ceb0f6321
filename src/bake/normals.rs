use nalgebra::Vector3;

/// Quantized angles of a normal's three components.
pub type AngleTriple = [u16; 3];

/// Alpha written for a cell that carries a deviation.
pub const FULL_ALPHA: u16 = u16::MAX;

/// Encodes one normal component as `degrees(acos(c)) * 360`, rounded and
/// clamped to 16 bits.
pub fn quantize_component(component: f64) -> u16 {
    let degrees = component.clamp(-1.0, 1.0).acos().to_degrees();
    (degrees * 360.0).round().clamp(0.0, u16::MAX as f64) as u16
}

pub fn quantize_normal(normal: &Vector3<f64>) -> AngleTriple {
    [
        quantize_component(normal.x),
        quantize_component(normal.y),
        quantize_component(normal.z),
    ]
}

/// Per-axis deviation of a pose from the neutral pose.
///
/// Without a neutral baseline the pose angles are returned as-is. Deviations
/// whose axis sum stays below `threshold` collapse to zero.
pub fn angle_deviation(pose: AngleTriple, neutral: Option<AngleTriple>, threshold: u32) -> AngleTriple {
    let Some(neutral) = neutral else {
        return pose;
    };
    let deviation = [
        pose[0].abs_diff(neutral[0]),
        pose[1].abs_diff(neutral[1]),
        pose[2].abs_diff(neutral[2]),
    ];
    let sum: u32 = deviation.iter().map(|&d| d as u32).sum();
    if sum < threshold { [0; 3] } else { deviation }
}

/// Atlas pixel for an angle triple; all-zero angles become a transparent cell.
pub fn encode_pixel(angles: AngleTriple) -> [u16; 4] {
    if angles == [0; 3] {
        [0; 4]
    } else {
        [angles[0], angles[1], angles[2], FULL_ALPHA]
    }
}
