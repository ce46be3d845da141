//! IdGenerator port - ID 生成の抽象化
//!
//! subscriber key は transport の接続ごとに発行され、partition をまたいでも
//! 衝突してはいけない。ULID を使えば調整なしで生成できる。

use crate::domain::ids::SubscriberKey;
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator は subscriber key を生成
pub trait IdGenerator: Send + Sync {
    fn generate_subscriber_key(&self) -> SubscriberKey;
}

/// UlidGenerator は ULID ベースの ID 生成器
///
/// timestamp 部分は Clock から取る。テストで FixedClock を使えば timestamp は決定的になる。
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_subscriber_key(&self) -> SubscriberKey {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        let ulid = Ulid::from_parts(timestamp_ms, rand::random());
        SubscriberKey::from(ulid)
    }
}
