//! Demo data for a fresh document store.

use chrono::{Duration, Utc};
use color_eyre::Result;
use serde_json::json;
use tracing::info;

use super::sqlite::SqliteSource;

const STATUSES: &[&str] = &["pending", "paid", "shipped", "delivered"];
const PRODUCTS: &[(&str, u32)] = &[
  ("Desk", 240),
  ("Chair", 120),
  ("Lamp", 35),
  ("Shelf", 80),
  ("Monitor", 199),
];

/// What `seed_demo` wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedSummary {
  pub companies: usize,
  pub products: usize,
  pub users: usize,
  pub orders: usize,
}

/// Write `companies` companies, each with a product catalogue and two users,
/// plus `orders` orders spread across those users.
///
/// Ids are deterministic, so seeding twice overwrites instead of duplicating.
pub fn seed_demo(source: &SqliteSource, companies: usize, orders: usize) -> Result<SeedSummary> {
  let now = Utc::now();
  let mut summary = SeedSummary::default();
  let mut users = Vec::new();

  for c in 0..companies {
    let company_id = format!("c{}", c + 1);
    source.put(
      "companies",
      &company_id,
      &json!({ "name": format!("Company {}", c + 1) }),
    )?;
    summary.companies += 1;

    for (p, (name, price)) in PRODUCTS.iter().enumerate() {
      source.put(
        "products",
        &format!("{}-p{}", company_id, p + 1),
        &json!({
          "companyId": company_id,
          "name": name,
          "price": price,
          "createdAt": (now - Duration::days(p as i64)).to_rfc3339(),
        }),
      )?;
      summary.products += 1;
    }

    for u in 0..2 {
      let user_id = format!("{}-u{}", company_id, u + 1);
      source.put(
        "users",
        &user_id,
        &json!({ "companyId": company_id, "name": format!("User {}", user_id) }),
      )?;
      users.push((user_id, company_id.clone()));
      summary.users += 1;
    }
  }

  if !users.is_empty() {
    for o in 0..orders {
      let (user_id, company_id) = &users[o % users.len()];
      let (_, price) = PRODUCTS[o % PRODUCTS.len()];
      source.put(
        "orders",
        &format!("o{:05}", o + 1),
        &json!({
          "userId": user_id,
          "companyId": company_id,
          "status": STATUSES[o % STATUSES.len()],
          "total": price * (1 + (o % 3) as u32),
          "createdAt": (now - Duration::minutes(o as i64)).to_rfc3339(),
        }),
      )?;
      summary.orders += 1;
    }
  }

  info!(?summary, "seeded demo documents");
  Ok(summary)
}
