//! 模拟支付结果
//!
//! 支付网关不在本系统范围内，处理器只需要一个"成功/失败"的判定来源。

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// 支付结果判定
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
pub trait PaymentOutcome: Send + Sync {
    fn decide_success(&self) -> bool;
}

/// 按成功率随机判定，可固定种子复现
pub struct RandomPaymentOutcome {
    rng: Mutex<StdRng>,
    success_rate: f64,
}

impl RandomPaymentOutcome {
    /// `success_rate` 超出 [0, 1] 时截断
    pub fn new(success_rate: f64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let success_rate = if success_rate.is_nan() {
            0.0
        } else {
            success_rate.clamp(0.0, 1.0)
        };

        Self {
            rng: Mutex::new(rng),
            success_rate,
        }
    }

    pub fn success_rate(&self) -> f64 {
        self.success_rate
    }
}

impl PaymentOutcome for RandomPaymentOutcome {
    fn decide_success(&self) -> bool {
        self.rng.lock().random_bool(self.success_rate)
    }
}

/// 固定结果
#[derive(Debug, Clone, Copy)]
pub struct FixedPaymentOutcome(pub bool);

impl PaymentOutcome for FixedPaymentOutcome {
    fn decide_success(&self) -> bool {
        self.0
    }
}
