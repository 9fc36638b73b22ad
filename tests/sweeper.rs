mod common;

use std::time::Duration as StdDuration;

use chrono::Duration;
use repairshop_api::{services::reservation_service, sweeper::ExpirySweeper};
use tokio_util::sync::CancellationToken;

use common::{counters, create_product, customer, setup};

#[tokio::test]
async fn background_sweeper_releases_lapsed_holds_and_stops_on_cancel() -> anyhow::Result<()> {
    let app = setup().await?;
    let product = create_product(&app.state, "lens", 150, 6).await?;
    let user = customer(&app.state).await?;

    reservation_service::add_to_cart(&app.state, &user, &product.slug, 4).await?;
    app.clock.advance(Duration::minutes(31));

    let shutdown = CancellationToken::new();
    let handle = ExpirySweeper::new(app.state.clone()).spawn(shutdown.clone());

    let released = tokio::time::timeout(StdDuration::from_secs(10), async {
        loop {
            if counters(&app.state, &product).await? == (6, 0) {
                return anyhow::Ok(());
            }
            tokio::time::sleep(StdDuration::from_millis(20)).await;
        }
    })
    .await;
    assert!(matches!(released, Ok(Ok(()))));

    shutdown.cancel();
    tokio::time::timeout(StdDuration::from_secs(5), handle).await??;
    Ok(())
}

#[tokio::test]
async fn sweep_once_reports_what_it_released() -> anyhow::Result<()> {
    let app = setup().await?;
    let product = create_product(&app.state, "sensor", 40, 3).await?;
    let user = customer(&app.state).await?;

    reservation_service::add_to_cart(&app.state, &user, &product.slug, 2).await?;
    let sweeper = ExpirySweeper::new(app.state.clone());

    let summary = sweeper.sweep_once().await?;
    assert_eq!(summary.released_reservations, 0);

    app.clock.advance(Duration::minutes(30));
    let summary = sweeper.sweep_once().await?;
    assert_eq!(summary.released_reservations, 1);
    assert_eq!(summary.released_units, 2);
    Ok(())
}
