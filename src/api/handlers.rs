use axum::extract::{Path, State};
use axum::Json;
use snafu::ResultExt;

use super::{App, InvalidOriginSnafu, InvalidSlugSnafu, Result, StorageSnafu, Visitor};
use crate::ledger::Action;
use crate::model::{ArticleStats, Slug};

/// `GET /api/stats/:slug`
pub async fn stats(State(app): State<App>, Path(slug): Path<String>) -> Result<Json<ArticleStats>> {
    let slug = Slug::try_from(slug).context(InvalidSlugSnafu)?;

    let stats = app.stats(&slug).await.context(StorageSnafu)?;
    Ok(Json(stats))
}

/// `POST /api/views/:slug`
pub async fn view(
    State(app): State<App>, Path(slug): Path<String>, visitor: Visitor,
) -> Result<Json<ArticleStats>> {
    record(app, Action::View, slug, visitor).await
}

/// `POST /api/likes/:slug`
pub async fn like(
    State(app): State<App>, Path(slug): Path<String>, visitor: Visitor,
) -> Result<Json<ArticleStats>> {
    record(app, Action::Like, slug, visitor).await
}

async fn record(
    app: App, action: Action, slug: String, visitor: Visitor,
) -> Result<Json<ArticleStats>> {
    let slug = Slug::try_from(slug).context(InvalidSlugSnafu)?;
    let identity = visitor.identity().context(InvalidOriginSnafu)?;

    let stats = app
        .record(action, &identity, &slug)
        .await
        .context(StorageSnafu)?;
    Ok(Json(stats))
}
