/// 자산/수익률 시계열 엔티티 모듈
pub mod equity_series {
    use sea_orm::entity::prelude::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
    #[sea_orm(table_name = "equity_series")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = true)]
        pub id: i64,

        /// 거래소 라벨 (binance, htx)
        #[sea_orm(column_type = "Text")]
        pub exchange: String,

        /// 메트릭 이름 (equity_usdt, return_pct_24h)
        #[sea_orm(column_type = "Text")]
        pub metric: String,

        /// 사이클 UTC 시간 (epoch ms, 조회/정렬 기준)
        #[sea_orm(column_type = "BigInteger")]
        pub ts_ms: i64,

        /// 사이클 UTC 시간 (ISO 8601 형식)
        #[sea_orm(column_type = "Text")]
        pub recorded_at: String,

        /// 값 (Decimal 문자열, 정밀도 손실 없음)
        #[sea_orm(column_type = "Text")]
        pub value: String,

        /// 대체 환율 사용 여부
        #[sea_orm(column_type = "Boolean")]
        pub stale: bool,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}
