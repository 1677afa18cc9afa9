//! Bundled demo listings, shown when no real data exists.

use crate::types::{EntityId, Listing, Timestamp};

/// 2024-01-01T00:00:00Z.
const BASE: i64 = 1_704_067_200_000;
const HOUR: i64 = 3_600_000;

struct SeedListing {
    key: &'static str,
    title: &'static str,
    price: u64,
    description: &'static str,
    category: &'static str,
    location: &'static str,
    hours_after_base: i64,
    likes: u32,
}

const SEED: &[SeedListing] = &[
    SeedListing {
        key: "1",
        title: "아이패드 에어 5세대 64GB",
        price: 550_000,
        description: "박스 풀구성입니다. 액정 기스 없어요.",
        category: "디지털기기",
        location: "역삼동",
        hours_after_base: 30,
        likes: 12,
    },
    SeedListing {
        key: "2",
        title: "원목 식탁 의자 2개",
        price: 40_000,
        description: "이사 가면서 정리합니다. 직접 가져가셔야 해요.",
        category: "가구/인테리어",
        location: "논현동",
        hours_after_base: 26,
        likes: 3,
    },
    SeedListing {
        key: "3",
        title: "접이식 자전거",
        price: 120_000,
        description: "출퇴근용으로 가볍게 탔습니다.",
        category: "스포츠/레저",
        location: "삼성동",
        hours_after_base: 20,
        likes: 8,
    },
    SeedListing {
        key: "4",
        title: "유아 원목 장난감 세트",
        price: 15_000,
        description: "아이가 커서 정리해요. 깨끗합니다.",
        category: "유아동",
        location: "역삼동",
        hours_after_base: 12,
        likes: 1,
    },
    SeedListing {
        key: "5",
        title: "캠핑 의자 팝니다",
        price: 25_000,
        description: "두 번 사용했습니다.",
        category: "스포츠/레저",
        location: "대치동",
        hours_after_base: 5,
        likes: 0,
    },
];

/// The seed listings, newest first. Sellers are left unresolved so chats
/// about them go to the placeholder seller.
pub fn listings() -> Vec<Listing> {
    let mut listings: Vec<Listing> = SEED
        .iter()
        .map(|s| Listing {
            id: EntityId::seed(s.key),
            title: s.title.to_string(),
            price: s.price,
            description: s.description.to_string(),
            category: s.category.to_string(),
            image_url: format!("https://picsum.photos/seed/carrot{}/400/400", s.key),
            location: s.location.to_string(),
            created_at: Timestamp(BASE + s.hours_after_base * HOUR),
            likes: s.likes,
            seller_id: None,
            seller_name: "당근이웃".to_string(),
            is_sold: false,
        })
        .collect();
    listings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    listings
}
