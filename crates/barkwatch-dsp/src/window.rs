use barkwatch_foundation::WindowKind;

/// Generate an analysis window of the given length.
///
/// Coefficients are computed once at extractor construction and reused for
/// every hop, so this does not need to be fast.
pub fn generate_window(kind: WindowKind, size: usize) -> Vec<f32> {
    if size == 0 {
        return Vec::new();
    }
    if size == 1 {
        return vec![1.0];
    }
    let denom = (size - 1) as f32;
    (0..size)
        .map(|i| {
            let x = 2.0 * std::f32::consts::PI * i as f32 / denom;
            match kind {
                WindowKind::Hamming => 0.54 - 0.46 * x.cos(),
                WindowKind::Hanning => 0.5 * (1.0 - x.cos()),
                WindowKind::Blackman => 0.42 - 0.5 * x.cos() + 0.08 * (2.0 * x).cos(),
                WindowKind::Rectangular => 1.0,
            }
        })
        .collect()
}
