//! Finite difference methods for numerical differentiation.
//!
//! Lens profiles without an analytic Hessian and the multi-plane ray-shooting
//! map are differentiated here.

/// Default step size for finite differences, in arcseconds.
pub const DEFAULT_EPSILON: f64 = 1e-6;

/// Compute the Jacobian of a map of the plane using central differences.
///
/// Returns `J` with `J[i][j] = ∂f_i/∂x_j`, where `x_0 = x` and `x_1 = y`.
///
/// # Arguments
///
/// * `f` - The map to differentiate
/// * `x`, `y` - The point at which to evaluate the Jacobian
/// * `epsilon` - The step size for finite differences (optional)
pub fn jacobian_2d<F>(f: F, x: f64, y: f64, epsilon: Option<f64>) -> [[f64; 2]; 2]
where
    F: Fn(f64, f64) -> (f64, f64),
{
    let eps = epsilon.unwrap_or(DEFAULT_EPSILON);

    // Adapt epsilon to the coordinate scale
    let eps_x = if x.abs() > 1.0 { x.abs() * eps } else { eps };
    let eps_y = if y.abs() > 1.0 { y.abs() * eps } else { eps };

    let (fx_p, fy_p) = f(x + eps_x, y);
    let (fx_m, fy_m) = f(x - eps_x, y);
    let d_dx = ((fx_p - fx_m) / (2.0 * eps_x), (fy_p - fy_m) / (2.0 * eps_x));

    let (fx_p, fy_p) = f(x, y + eps_y);
    let (fx_m, fy_m) = f(x, y - eps_y);
    let d_dy = ((fx_p - fx_m) / (2.0 * eps_y), (fy_p - fy_m) / (2.0 * eps_y));

    [[d_dx.0, d_dy.0], [d_dx.1, d_dy.1]]
}

/// Hessian `[f_xx, f_xy, f_yx, f_yy]` of a potential from its gradient field.
///
/// `gradient` returns `(∂ψ/∂x, ∂ψ/∂y)`; the mixed terms are reported
/// separately so that asymmetric numerical noise stays visible.
pub fn hessian_from_gradient<F>(gradient: F, x: f64, y: f64, epsilon: Option<f64>) -> [f64; 4]
where
    F: Fn(f64, f64) -> (f64, f64),
{
    let j = jacobian_2d(gradient, x, y, epsilon);
    [j[0][0], j[0][1], j[1][0], j[1][1]]
}
