const BETA1: f32 = 0.9;
const BETA2: f32 = 0.999;
const EPSILON: f32 = 1e-7;

/// First and second moment estimates for one parameter tensor.
#[derive(Debug, Clone)]
pub(super) struct AdamState {
    m: Vec<f32>,
    v: Vec<f32>,
}

impl AdamState {
    pub fn new(len: usize) -> Self {
        Self {
            m: vec![0.0; len],
            v: vec![0.0; len],
        }
    }

    /// Apply one bias-corrected Adam update; `step` starts at 1.
    pub fn update(&mut self, params: &mut [f32], grads: &[f32], learning_rate: f32, step: u32) {
        let correction1 = 1.0 - BETA1.powi(step as i32);
        let correction2 = 1.0 - BETA2.powi(step as i32);
        for i in 0..params.len() {
            let g = grads[i];
            self.m[i] = BETA1 * self.m[i] + (1.0 - BETA1) * g;
            self.v[i] = BETA2 * self.v[i] + (1.0 - BETA2) * g * g;
            let m_hat = self.m[i] / correction1;
            let v_hat = self.v[i] / correction2;
            params[i] -= learning_rate * m_hat / (v_hat.sqrt() + EPSILON);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_step_moves_by_learning_rate_against_gradient_sign() {
        let mut state = AdamState::new(2);
        let mut params = [1.0f32, 1.0];
        state.update(&mut params, &[0.5, -2.0], 0.01, 1);
        assert!((params[0] - 0.99).abs() < 1e-5);
        assert!((params[1] - 1.01).abs() < 1e-5);
    }

    #[test]
    fn zero_gradient_leaves_fresh_params_untouched() {
        let mut state = AdamState::new(1);
        let mut params = [3.0f32];
        state.update(&mut params, &[0.0], 0.1, 1);
        assert_eq!(params[0], 3.0);
    }
}
