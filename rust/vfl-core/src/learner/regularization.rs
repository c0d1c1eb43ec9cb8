//! L1 and L2 regularization.

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
/// The kind of regularization.
pub enum RegMode {
    None,
    /// L1: cost `λ·Σ|θ| / m`.
    Lasso,
    /// L2: cost `λ·Σθ² / (2m)`.
    Ridge,
}

impl Default for RegMode {
    fn default() -> Self {
        RegMode::None
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
/// A regularization with its strength `λ`.
pub struct Regularization {
    pub mode: RegMode,
    pub param: f64,
}

impl Regularization {
    /// The regularization cost of `thetas` over a batch of `m` samples.
    pub fn cost(&self, thetas: &[f64], m: usize) -> f64 {
        let m = m as f64;
        match self.mode {
            RegMode::None => 0.0,
            RegMode::Lasso => self.param * thetas.iter().map(|theta| theta.abs()).sum::<f64>() / m,
            RegMode::Ridge => {
                self.param * thetas.iter().map(|theta| theta * theta).sum::<f64>() / (2.0 * m)
            }
        }
    }

    /// The regularization term added to the gradient of `theta` over a batch of `m` samples.
    pub fn gradient(&self, theta: f64, m: usize) -> f64 {
        let m = m as f64;
        match self.mode {
            RegMode::None => 0.0,
            RegMode::Lasso => self.param * sign(theta) / m,
            RegMode::Ridge => self.param * theta / m,
        }
    }
}

fn sign(value: f64) -> f64 {
    if value > 0.0 {
        1.0
    } else if value < 0.0 {
        -1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lasso() {
        let reg = Regularization {
            mode: RegMode::Lasso,
            param: 0.5,
        };
        assert!((reg.cost(&[1.0, -2.0, 0.0], 4) - 0.375).abs() < 1e-12);
        assert!((reg.gradient(-3.0, 4) + 0.125).abs() < 1e-12);
        assert_eq!(reg.gradient(0.0, 4), 0.0);
    }

    #[test]
    fn test_ridge() {
        let reg = Regularization {
            mode: RegMode::Ridge,
            param: 0.5,
        };
        assert!((reg.cost(&[1.0, -2.0], 5) - 0.25).abs() < 1e-12);
        assert!((reg.gradient(-2.0, 5) + 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_none() {
        let reg = Regularization {
            mode: RegMode::None,
            param: 3.0,
        };
        assert_eq!(reg.cost(&[1.0, 2.0], 2), 0.0);
        assert_eq!(reg.gradient(1.0, 2), 0.0);
    }
}
