use std::{net::SocketAddr, sync::Arc};

use axum::{
    Json, Router,
    extract::{Query, Request, State},
    http::{StatusCode, header},
    middleware::{self, Next},
    response::{Html, IntoResponse, Response},
    routing::get,
};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use subtle::ConstantTimeEq;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, error, info, warn};

use crate::{
    config::Credentials,
    dashboard::{DisplayState, Snapshot},
    fetcher::{FetchError, StreamhosterClient},
    range::{DateRange, RangeError, parse_date},
    report::{MediaStatReport, ReportSummary},
};

const REALM: &str = r#"Basic realm="streamviz""#;

#[derive(Clone)]
pub struct AppState {
    pub client: Arc<StreamhosterClient>,
    pub display: Arc<DisplayState>,
    pub credentials: Arc<Credentials>,
    pub lookback_days: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    BadRequest(#[from] RangeError),

    #[error(transparent)]
    Fetch(#[from] FetchError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self {
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "request"),
            AppError::Fetch(e) => {
                error!("report fetch failed: {}", e);
                let status = if e.is_timeout() {
                    StatusCode::GATEWAY_TIMEOUT
                } else {
                    StatusCode::BAD_GATEWAY
                };
                (status, e.kind().as_str())
            }
        };

        let body = Json(json!({
            "error": self.to_string(),
            "kind": kind,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let gated = Router::new()
        .route("/", get(index))
        .route("/api/report", get(report))
        .route("/api/report/latest", get(latest))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_basic_auth));

    Router::new()
        .route("/api/health", get(health))
        .merge(gated)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

pub async fn serve(state: AppState, bind: SocketAddr) -> anyhow::Result<()> {
    let app = router(state);

    info!("Listening on http://{}", bind);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Fetches the default range so the first page load has something to draw.
/// Failures are recorded on the display and do not stop the server.
pub async fn load_initial(state: &AppState, today: NaiveDate) {
    let range = DateRange::trailing(state.lookback_days, today);
    let ticket = state.display.begin();
    match state.client.fetch(&range, "").await {
        Ok(report) => {
            state.display.commit(ticket, Snapshot::new(range, "", report));
        }
        Err(e) => {
            warn!(%range, "initial report fetch failed: {}", e);
            state.display.fail(ticket, &e);
        }
    }
}

async fn require_basic_auth(State(st): State<AppState>, req: Request, next: Next) -> Response {
    let authorized = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(decode_basic)
        .is_some_and(|(user, pass)| credentials_match(&st.credentials, &user, &pass));

    if authorized {
        return next.run(req).await;
    }

    debug!(path = %req.uri().path(), "unauthenticated dashboard request");
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, REALM)],
        "authentication required",
    )
        .into_response()
}

fn decode_basic(value: &str) -> Option<(String, String)> {
    let (scheme, encoded) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = BASE64.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

fn credentials_match(expected: &Credentials, user: &str, pass: &str) -> bool {
    let user_ok: bool = user.as_bytes().ct_eq(expected.username.as_bytes()).into();
    let pass_ok: bool = pass.as_bytes().ct_eq(expected.password.as_bytes()).into();
    user_ok & pass_ok
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "streamviz",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Debug, Deserialize)]
struct ReportParams {
    start: Option<String>,
    end: Option<String>,
    media_key: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReportBody {
    range: DateRange,
    media_key: String,
    rows: MediaStatReport,
    summary: ReportSummary,
    fetched_at: DateTime<Utc>,
    superseded: bool,
}

impl ReportBody {
    fn new(snapshot: &Snapshot) -> Self {
        Self {
            range: snapshot.range,
            media_key: snapshot.media_key.clone(),
            rows: snapshot.report.clone(),
            summary: snapshot.report.summary(),
            fetched_at: snapshot.fetched_at,
            superseded: false,
        }
    }
}

#[derive(Debug, Serialize)]
struct LatestBody {
    snapshot: Option<ReportBody>,
    error: Option<String>,
}

fn non_empty(v: Option<&str>) -> Option<&str> {
    v.map(str::trim).filter(|s| !s.is_empty())
}

fn resolve_range(q: &ReportParams, today: NaiveDate, lookback_days: u64) -> Result<DateRange, RangeError> {
    let fallback = DateRange::trailing(lookback_days, today);
    let start = match non_empty(q.start.as_deref()) {
        Some(s) => parse_date(s)?,
        None => fallback.start(),
    };
    let end = match non_empty(q.end.as_deref()) {
        Some(s) => parse_date(s)?,
        None => fallback.end(),
    };
    DateRange::bounded(start, end, today)
}

async fn report(
    State(st): State<AppState>,
    Query(q): Query<ReportParams>,
) -> Result<Json<ReportBody>, AppError> {
    let today = Local::now().date_naive();
    let range = resolve_range(&q, today, st.lookback_days)?;
    let media_key = q.media_key.unwrap_or_default();

    let ticket = st.display.begin();
    match st.client.fetch(&range, &media_key).await {
        Ok(report) => {
            let snapshot = Snapshot::new(range, media_key, report);
            let body = ReportBody::new(&snapshot);
            let superseded = !st.display.commit(ticket, snapshot);
            Ok(Json(ReportBody { superseded, ..body }))
        }
        Err(e) => {
            st.display.fail(ticket, &e);
            Err(e.into())
        }
    }
}

async fn latest(State(st): State<AppState>) -> Json<LatestBody> {
    let view = st.display.view();
    Json(LatestBody {
        snapshot: view.snapshot.as_deref().map(ReportBody::new),
        error: view.error,
    })
}

const INDEX_HTML: &str = r#"
<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>VNR1 Dashboard</title>
    <script src="https://cdn.jsdelivr.net/npm/chart.js@4.4.0/dist/chart.umd.min.js"></script>
    <style>
        * { margin: 0; padding: 0; box-sizing: border-box; }
        body {
            font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, sans-serif;
            background: linear-gradient(135deg, #667eea 0%, #764ba2 100%);
            min-height: 100vh;
            padding: 20px;
        }
        .container { max-width: 1600px; margin: 0 auto; }
        h1 {
            color: white;
            font-size: 2.5rem;
            margin-bottom: 10px;
            text-shadow: 2px 2px 4px rgba(0,0,0,0.2);
        }
        .subtitle {
            color: rgba(255,255,255,0.9);
            font-size: 1.1rem;
            margin-bottom: 20px;
        }
        .controls {
            display: flex;
            flex-wrap: wrap;
            gap: 16px;
            align-items: flex-end;
            background: white;
            padding: 20px 25px;
            border-radius: 12px;
            box-shadow: 0 10px 30px rgba(0,0,0,0.2);
            margin-bottom: 20px;
        }
        .controls label { display: block; font-weight: 500; color: #333; margin-bottom: 6px; }
        .controls input {
            padding: 8px 10px;
            border: 1px solid #ccd;
            border-radius: 6px;
            font-size: 1rem;
        }
        .controls button {
            font-size: 1.1rem;
            padding: 10px 22px;
            border: none;
            border-radius: 6px;
            background: #667eea;
            color: white;
            cursor: pointer;
        }
        .controls button:hover { background: #5a67d8; }
        .summary { color: #555; margin-left: auto; }
        .banner {
            display: none;
            background: #fee;
            color: #dc2626;
            border-left: 4px solid #dc2626;
            padding: 12px 16px;
            border-radius: 6px;
            margin-bottom: 20px;
        }
        .grid {
            display: grid;
            grid-template-columns: repeat(auto-fit, minmax(450px, 1fr));
            gap: 20px;
            margin-bottom: 20px;
        }
        .card {
            background: white;
            padding: 25px;
            border-radius: 12px;
            box-shadow: 0 10px 30px rgba(0,0,0,0.2);
        }
        .card h2 {
            margin: 0 0 20px 0;
            font-size: 1.3rem;
            color: #333;
            border-bottom: 3px solid #667eea;
            padding-bottom: 10px;
        }
        .chart-container {
            position: relative;
            height: 500px;
            overflow-x: auto;
        }
        table { width: 100%; border-collapse: collapse; }
        th, td { text-align: left; padding: 8px 12px; border-bottom: 1px solid #eee; }
        th { color: #667eea; }
        td.num, th.num { text-align: right; font-variant-numeric: tabular-nums; }
        .loading {
            text-align: center;
            padding: 40px;
            color: #999;
            font-style: italic;
        }
    </style>
</head>
<body>
    <div class="container">
        <h1>VNR1 Dashboard</h1>
        <p class="subtitle">Media views and unique viewers by media key</p>

        <form class="controls" id="controls">
            <div>
                <label for="mediakeyinput">Media Key</label>
                <input id="mediakeyinput" type="text" value="">
            </div>
            <div>
                <label for="start-date">Start</label>
                <input id="start-date" type="date" required>
            </div>
            <div>
                <label for="end-date">End</label>
                <input id="end-date" type="date" required>
            </div>
            <button id="submit-button" type="submit">Submit</button>
            <span class="summary" id="summary"></span>
        </form>

        <div class="banner" id="error-banner"></div>

        <div class="grid">
            <div class="card">
                <h2>Media Views</h2>
                <div class="chart-container">
                    <canvas id="views"></canvas>
                </div>
            </div>

            <div class="card">
                <h2>Unique Viewers</h2>
                <div class="chart-container">
                    <canvas id="uniques"></canvas>
                </div>
            </div>
        </div>

        <div class="card">
            <h2>Media Statistics</h2>
            <table>
                <thead>
                    <tr>
                        <th>mediaKey</th>
                        <th class="num">views</th>
                        <th class="num">uniques</th>
                        <th class="num">dataTransferGB</th>
                    </tr>
                </thead>
                <tbody id="table-body">
                    <tr><td colspan="4" class="loading">Loading...</td></tr>
                </tbody>
            </table>
        </div>
    </div>

    <script>
        const charts = {};
        let seq = 0;
        let inflight = null;

        function localToday() {
            const d = new Date();
            d.setMinutes(d.getMinutes() - d.getTimezoneOffset());
            return d.toISOString().slice(0, 10);
        }

        function showError(msg) {
            const el = document.getElementById('error-banner');
            el.textContent = msg + ' (showing last loaded data)';
            el.style.display = 'block';
        }

        function clearError() {
            document.getElementById('error-banner').style.display = 'none';
        }

        function barChart(id, label, rows, field, yTitle) {
            if (charts[id]) charts[id].destroy();
            const ctx = document.getElementById(id).getContext('2d');
            charts[id] = new Chart(ctx, {
                type: 'bar',
                data: {
                    labels: rows.map(r => r.mediaKey),
                    datasets: [{
                        label: label,
                        data: rows.map(r => r[field]),
                        backgroundColor: 'rgba(102, 126, 234, 0.8)',
                        borderColor: '#667eea',
                        borderWidth: 1
                    }]
                },
                options: {
                    responsive: true,
                    maintainAspectRatio: false,
                    plugins: { legend: { display: false } },
                    scales: {
                        y: { beginAtZero: true, title: { display: true, text: yTitle } }
                    }
                }
            });
        }

        function renderTable(rows) {
            const body = document.getElementById('table-body');
            body.replaceChildren();
            if (rows.length === 0) {
                const tr = body.insertRow();
                const td = tr.insertCell();
                td.colSpan = 4;
                td.className = 'loading';
                td.textContent = 'No data available';
                return;
            }
            for (const r of rows) {
                const tr = body.insertRow();
                tr.insertCell().textContent = r.mediaKey;
                const cells = [r.views.toLocaleString(), r.uniques.toLocaleString(), r.dataTransferGB.toFixed(3)];
                for (const text of cells) {
                    const td = tr.insertCell();
                    td.className = 'num';
                    td.textContent = text;
                }
            }
        }

        function render(report) {
            const rows = report.rows || [];
            barChart('views', 'Views', rows, 'views', 'Count of Media Views');
            barChart('uniques', 'Uniques', rows, 'uniques', 'Count of Unique Viewers');
            renderTable(rows);
            const s = report.summary;
            document.getElementById('summary').textContent =
                `${report.range.start} to ${report.range.end}: ${s.media} media, ` +
                `${s.views.toLocaleString()} views, ${s.uniques.toLocaleString()} uniques, ` +
                `${s.dataTransferGB.toFixed(2)} GB` +
                (report.mediaKey ? ` (media key contains "${report.mediaKey}")` : '');
        }

        async function refresh() {
            if (inflight) inflight.abort();
            const ctl = new AbortController();
            inflight = ctl;
            const mine = ++seq;

            const params = new URLSearchParams({
                start: document.getElementById('start-date').value,
                end: document.getElementById('end-date').value,
                media_key: document.getElementById('mediakeyinput').value
            });

            try {
                const res = await fetch('/api/report?' + params, { signal: ctl.signal });
                const data = await res.json();
                if (mine !== seq) return;
                if (!res.ok) {
                    showError(data.error || ('HTTP ' + res.status));
                    return;
                }
                clearError();
                render(data);
            } catch (e) {
                if (e.name === 'AbortError' || mine !== seq) return;
                showError('Error loading data');
                console.error('Error:', e);
            } finally {
                if (mine === seq) inflight = null;
            }
        }

        async function init() {
            const today = localToday();
            const start = document.getElementById('start-date');
            const end = document.getElementById('end-date');
            start.max = today;
            end.max = today;

            document.getElementById('controls').addEventListener('submit', ev => {
                ev.preventDefault();
                refresh();
            });

            try {
                const res = await fetch('/api/report/latest');
                const data = await res.json();
                if (data.snapshot) {
                    start.value = data.snapshot.range.start;
                    end.value = data.snapshot.range.end;
                    document.getElementById('mediakeyinput').value = data.snapshot.mediaKey;
                    render(data.snapshot);
                    if (data.error) showError(data.error);
                    return;
                }
            } catch (e) {
                console.error('Error:', e);
            }

            const yesterday = new Date(today);
            yesterday.setDate(yesterday.getDate() - 1);
            start.value = yesterday.toISOString().slice(0, 10);
            end.value = today;
            refresh();
        }

        init();
    </script>
</body>
</html>
"#;
