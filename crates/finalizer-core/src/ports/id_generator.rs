//! LeaseTokenGenerator port - リーストークン生成の抽象化
//!
//! # 実装
//! - **UlidTokenGenerator**: ULID ベース（本番用）

use ulid::Ulid;

use crate::domain::LeaseToken;
use crate::ports::Clock;

/// LeaseTokenGenerator はロック取得ごとに一意なトークンを生成
///
/// # ULID の特性
/// - 分散環境で生成可能（調整不要）
/// - 128-bit のうち 80-bit がランダム部分なので、同じミリ秒でも衝突しない
pub trait LeaseTokenGenerator: Send + Sync {
    fn generate(&self) -> LeaseToken;
}

/// ULID tokens whose timestamp part comes from the given clock.
pub struct UlidTokenGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidTokenGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> LeaseTokenGenerator for UlidTokenGenerator<C> {
    fn generate(&self) -> LeaseToken {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        let ulid = Ulid::from_parts(timestamp_ms, rand::random());
        LeaseToken::from(ulid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{FixedClock, SystemClock};
    use chrono::{TimeZone, Utc};

    #[test]
    fn generates_unique_tokens() {
        let tokens = UlidTokenGenerator::new(SystemClock);

        let t1 = tokens.generate();
        let t2 = tokens.generate();
        let t3 = tokens.generate();

        assert_ne!(t1, t2);
        assert_ne!(t2, t3);
        assert_ne!(t1, t3);
    }

    #[test]
    fn fixed_clock_sets_the_timestamp_part() {
        let fixed_time = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let tokens = UlidTokenGenerator::new(FixedClock::new(fixed_time));

        let t1 = tokens.generate();
        let t2 = tokens.generate();

        // random part differs, timestamp part does not
        assert_ne!(t1, t2);
        assert_eq!(t1.as_ulid().timestamp_ms(), t2.as_ulid().timestamp_ms());
        assert_eq!(
            t1.as_ulid().timestamp_ms(),
            fixed_time.timestamp_millis() as u64
        );
    }
}
