//! Scalar matrix transposes, element by element.

/// Transpose a matrix from row-major `input` to row-major `output`.
///
/// Given an input matrix with `height` rows and `width` columns, produces
/// an output matrix with `width` rows and `height` columns.
///
/// ```text
///     Input (height=2, width=3):       Output (height=3, width=2):
///
///     Row 0: [ a, b, c ]               Row 0: [ a, d ]
///     Row 1: [ d, e, f ]               Row 1: [ b, e ]
///                                      Row 2: [ c, f ]
/// ```
///
/// # Panics
///
/// Panics if:
/// - `input.len() != width * height`
/// - `output.len() != width * height`
#[inline]
pub fn transpose<T: Copy>(input: &[T], output: &mut [T], width: usize, height: usize) {
    assert_eq!(
        input.len(),
        width * height,
        "Input length {} doesn't match width*height = {}",
        input.len(),
        width * height
    );
    assert_eq!(
        output.len(),
        width * height,
        "Output length {} doesn't match width*height = {}",
        output.len(),
        width * height
    );

    transpose_strided(input, width, output, height, width, height);
}

/// Transpose a `height × width` block whose rows are `input_stride` elements apart into a
/// `width × height` block whose rows are `output_stride` elements apart.
///
/// Elements of `output` outside the block are left untouched.
///
/// # Panics
///
/// Panics if either slice is too short for its block.
pub fn transpose_strided<T: Copy>(
    input: &[T],
    input_stride: usize,
    output: &mut [T],
    output_stride: usize,
    width: usize,
    height: usize,
) {
    if width == 0 || height == 0 {
        return;
    }
    assert!(width <= input_stride && height <= output_stride);
    assert!(input.len() >= (height - 1) * input_stride + width);
    assert!(output.len() >= (width - 1) * output_stride + height);

    // Outer loop over columns (output rows).
    for x in 0..width {
        // Inner loop over rows (output columns).
        for y in 0..height {
            output[x * output_stride + y] = input[y * input_stride + x];
        }
    }
}
