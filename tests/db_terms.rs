#[allow(dead_code)]
mod helpers;

use bannerwatch::banner::BannerTerm;
use bannerwatch::data::terms;
use sqlx::PgPool;

fn banner_term(code: &str, description: &str) -> BannerTerm {
    BannerTerm {
        code: code.to_owned(),
        description: description.to_owned(),
    }
}

#[sqlx::test]
async fn sync_enables_only_the_latest_term(pool: PgPool) {
    let result = terms::sync_terms_from_banner(
        &pool,
        vec![
            banner_term("202520", "Spring 2025"),
            banner_term("202610", "Fall 2025"),
            banner_term("202530", "Summer 2025"),
        ],
    )
    .await
    .unwrap();

    assert_eq!(result.inserted, 3);

    let enabled = terms::get_enabled_terms(&pool).await.unwrap();
    assert_eq!(enabled.len(), 1);
    assert_eq!(enabled[0].code, "202610");
}

#[sqlx::test]
async fn sync_never_flips_existing_scrape_enabled(pool: PgPool) {
    terms::sync_terms_from_banner(&pool, vec![banner_term("202610", "Fall 2025")])
        .await
        .unwrap();

    // Operator disables the term
    assert!(terms::disable_scraping(&pool, "202610").await.unwrap());

    // A later sync updates metadata but leaves the flag alone
    let result = terms::sync_terms_from_banner(
        &pool,
        vec![banner_term("202610", "Fall 2025 (View Only)")],
    )
    .await
    .unwrap();
    assert_eq!(result.updated, 1);

    let term = terms::get_term_by_code(&pool, "202610")
        .await
        .unwrap()
        .unwrap();
    assert!(!term.scrape_enabled);
    assert!(term.is_archived);
    assert_eq!(term.description, "Fall 2025 (View Only)");
}

#[sqlx::test]
async fn sync_skips_unrecognized_codes(pool: PgPool) {
    let result = terms::sync_terms_from_banner(
        &pool,
        vec![
            banner_term("201411", "Legacy Mini-mester"),
            banner_term("202610", "Fall 2025"),
        ],
    )
    .await
    .unwrap();

    assert_eq!(result.inserted, 1);
    assert_eq!(result.skipped, 1);
    assert!(terms::get_term_by_code(&pool, "201411")
        .await
        .unwrap()
        .is_none());
}

#[sqlx::test]
async fn enable_and_disable_toggle(pool: PgPool) {
    terms::sync_terms_from_banner(
        &pool,
        vec![
            banner_term("202530", "Summer 2025"),
            banner_term("202610", "Fall 2025"),
        ],
    )
    .await
    .unwrap();

    assert!(terms::enable_scraping(&pool, "202530").await.unwrap());
    let enabled = terms::get_enabled_terms(&pool).await.unwrap();
    assert_eq!(enabled.len(), 2);

    assert!(terms::disable_scraping(&pool, "202530").await.unwrap());
    let enabled = terms::get_enabled_terms(&pool).await.unwrap();
    assert_eq!(enabled.len(), 1);

    // Unknown codes report not-found
    assert!(!terms::enable_scraping(&pool, "209910").await.unwrap());
}

#[sqlx::test]
async fn update_last_scraped_at_sets_timestamp(pool: PgPool) {
    terms::sync_terms_from_banner(&pool, vec![banner_term("202610", "Fall 2025")])
        .await
        .unwrap();

    let before = terms::get_term_by_code(&pool, "202610")
        .await
        .unwrap()
        .unwrap();
    assert!(before.last_scraped_at.is_none());

    terms::update_last_scraped_at(&pool, "202610").await.unwrap();

    let after = terms::get_term_by_code(&pool, "202610")
        .await
        .unwrap()
        .unwrap();
    assert!(after.last_scraped_at.is_some());
}
