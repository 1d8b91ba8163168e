//! Fixed quadrature rule for integrals along a tomography line.
//!
//! The rule is a composite 8-point Gauss–Legendre scheme over `v ∈ (0, 1)`
//! with `PANELS` equal panels, pushed through the smoothstep substitution
//! `u = v²(3 − 2v)`, `du = 6v(1 − v) dv`. The substitution clusters nodes near
//! both ends of the segment, where the logit-normal density varies fastest.
//! Nodes never touch 0 or 1.
//!
//! The node set does not depend on the model parameters, so every E-step and
//! every likelihood evaluation uses the same discretization.
use std::sync::OnceLock;

/// Number of Gauss–Legendre panels over `(0, 1)`.
pub const PANELS: usize = 24;

const GL8_NODES: [f64; 8] = [
    -0.960_289_856_497_536_3,
    -0.796_666_477_413_626_7,
    -0.525_532_409_916_329_0,
    -0.183_434_642_495_649_8,
    0.183_434_642_495_649_8,
    0.525_532_409_916_329_0,
    0.796_666_477_413_626_7,
    0.960_289_856_497_536_3,
];

const GL8_WEIGHTS: [f64; 8] = [
    0.101_228_536_290_376_3,
    0.222_381_034_453_374_5,
    0.313_706_645_877_887_3,
    0.362_683_783_378_362_0,
    0.362_683_783_378_362_0,
    0.313_706_645_877_887_3,
    0.222_381_034_453_374_5,
    0.101_228_536_290_376_3,
];

/// One node of the rule: position `u ∈ (0, 1)` and weight for `∫₀¹ g(u) du`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineNode {
    pub u: f64,
    pub weight: f64,
}

static LINE_NODES: OnceLock<Vec<LineNode>> = OnceLock::new();

/// Shared node table, built on first use.
pub fn line_nodes() -> &'static [LineNode] {
    LINE_NODES.get_or_init(build_nodes)
}

fn build_nodes() -> Vec<LineNode> {
    let h = 1.0 / PANELS as f64;
    let mut nodes = Vec::with_capacity(PANELS * GL8_NODES.len());
    for k in 0..PANELS {
        let left = k as f64 * h;
        for (&x, &w) in GL8_NODES.iter().zip(GL8_WEIGHTS.iter()) {
            let v = left + 0.5 * h * (x + 1.0);
            let u = v * v * (3.0 - 2.0 * v);
            let du = 6.0 * v * (1.0 - v);
            nodes.push(LineNode { u, weight: 0.5 * h * w * du });
        }
    }
    nodes
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // These tests cover:
    // - Exactness of the rule on low-degree polynomials in u.
    // - Nodes strictly inside (0, 1).
    // -------------------------------------------------------------------------

    #[test]
    // Purpose
    // -------
    // The substituted rule integrates polynomials in u exactly.
    //
    // Given
    // -----
    // - g(u) = 1, u², u³.
    //
    // Expect
    // ------
    // - 1, 1/3, 1/4 up to rounding.
    fn integrates_polynomials_exactly() {
        let nodes = line_nodes();
        let integrate =
            |g: &dyn Fn(f64) -> f64| nodes.iter().map(|n| n.weight * g(n.u)).sum::<f64>();

        assert_relative_eq!(integrate(&|_| 1.0), 1.0, epsilon = 1e-13);
        assert_relative_eq!(integrate(&|u| u * u), 1.0 / 3.0, epsilon = 1e-13);
        assert_relative_eq!(integrate(&|u| u * u * u), 0.25, epsilon = 1e-13);
    }

    #[test]
    // Purpose
    // -------
    // No node sits on an end point, so logits along the segment stay finite.
    //
    // Given
    // -----
    // - The shared table.
    //
    // Expect
    // ------
    // - 0 < u < 1 and positive weights for every node.
    fn nodes_are_interior() {
        let nodes = line_nodes();
        assert_eq!(nodes.len(), PANELS * 8);
        assert!(nodes.iter().all(|n| n.u > 0.0 && n.u < 1.0 && n.weight > 0.0));
    }
}
