use std::{
    collections::HashMap,
    io::ErrorKind,
    net::SocketAddr,
    path::PathBuf,
    sync::{Arc, OnceLock},
    time::{Duration, Instant},
};

use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::Serialize;
use tokio::{net::TcpListener, sync::Mutex};
use tracing::{debug, error, info, warn};

use climate_common::{
    sensor::validate_sample, ControlError, DisplayUnit, Evaluation, FileMedium, Outcome,
    RuntimeConfig, SensorInputs, SetpointEdge, SettingsStore, ThermostatEngine,
    ThermostatMode, ThermostatState, REGION_SIZE, TOPIC_CONTROLLER_STATE,
    TOPIC_SENSOR_HUMIDITY, TOPIC_SENSOR_TEMP,
};

type Engine = ThermostatEngine<FileMedium>;

#[derive(Clone)]
struct AppState {
    engine: Arc<Mutex<Engine>>,
    sensors: Arc<Mutex<SensorInputs>>,
    mqtt: AsyncClient,
}

#[derive(Clone)]
struct AppStore {
    runtime_path: Arc<PathBuf>,
    settings_path: Arc<PathBuf>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
struct SettingsView {
    #[serde(rename = "screenImperial")]
    screen_imperial: bool,
    #[serde(rename = "remoteTemperature")]
    remote_temperature: bool,
}

const MAX_MQTT_PAYLOAD_BYTES: usize = 64;

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = AppStore::new();
    let mut runtime = store.load_runtime_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config from store: {err:#}");
        RuntimeConfig::default()
    });
    apply_env_overrides(&mut runtime);
    runtime.sanitize();

    // Running on unknown persisted state is worse than not running.
    let medium = FileMedium::open(store.settings_path.as_ref(), REGION_SIZE)
        .context("failed to open settings medium")?;
    let settings = SettingsStore::open(medium).context("failed to load settings region")?;
    let engine = ThermostatEngine::new(runtime.thermostat.clone(), settings)
        .context("failed to restore thermostat settings")?;
    let sensors = SensorInputs::new(engine.config().sensor_stale_timeout_ms);

    let mut mqtt_options = MqttOptions::new(
        "climate-controller",
        runtime.network.mqtt_host.clone(),
        runtime.network.mqtt_port,
    );
    if !runtime.network.mqtt_user.is_empty() {
        mqtt_options.set_credentials(
            runtime.network.mqtt_user.clone(),
            runtime.network.mqtt_pass.clone(),
        );
    }

    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 64);

    let app_state = AppState {
        engine: Arc::new(Mutex::new(engine)),
        sensors: Arc::new(Mutex::new(sensors)),
        mqtt,
    };

    subscribe_topics(&app_state.mqtt).await?;
    spawn_mqtt_loop(app_state.clone(), eventloop);
    spawn_control_loop(app_state.clone(), runtime.thermostat.poll_interval_ms);
    spawn_state_publish_loop(app_state.clone(), runtime.thermostat.state_publish_interval_ms);

    let app = Router::new()
        .route("/api/status", get(handle_get_status))
        .route("/api/mode", post(handle_set_mode))
        .route("/api/state", post(handle_set_state))
        .route("/api/setpoint", post(handle_set_setpoint))
        .route("/api/setpoint/low", post(handle_set_setpoint_low))
        .route("/api/setpoint/high", post(handle_set_setpoint_high))
        .route("/api/temperature", post(handle_set_remote_temperature))
        .route(
            "/api/settings",
            get(handle_get_settings).post(handle_set_settings),
        )
        .route("/api/factory-reset", post(handle_factory_reset))
        .with_state(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], runtime.network.http_port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!("controller listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

fn apply_env_overrides(runtime: &mut RuntimeConfig) {
    let network = &mut runtime.network;
    if let Ok(host) = std::env::var("MQTT_HOST") {
        network.mqtt_host = host;
    }
    if let Some(port) = env_port("MQTT_PORT") {
        network.mqtt_port = port;
    }
    if let Ok(user) = std::env::var("MQTT_USER") {
        network.mqtt_user = user;
    }
    if let Ok(pass) = std::env::var("MQTT_PASS") {
        network.mqtt_pass = pass;
    }
    if let Some(port) = env_port("CLIMATE_HTTP_PORT") {
        network.http_port = port;
    }
}

fn env_port(key: &str) -> Option<u16> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

async fn subscribe_topics(mqtt: &AsyncClient) -> anyhow::Result<()> {
    for topic in [TOPIC_SENSOR_TEMP, TOPIC_SENSOR_HUMIDITY] {
        mqtt.subscribe(topic, QoS::AtMostOnce).await?;
    }
    Ok(())
}

fn spawn_mqtt_loop(app_state: AppState, mut eventloop: rumqttc::EventLoop) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    if let Err(err) =
                        handle_mqtt_message(&app_state, &message.topic, &message.payload).await
                    {
                        warn!("mqtt message handling error: {err:#}");
                    }
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

fn spawn_control_loop(app_state: AppState, poll_interval_ms: u64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(poll_interval_ms));
        let mut applied = {
            let engine = app_state.engine.lock().await;
            engine.state()
        };
        apply_actuator_state(applied);

        loop {
            interval.tick().await;
            let now_ms = monotonic_ms();

            let result = {
                let mut engine = app_state.engine.lock().await;
                let temperature_c = app_state
                    .sensors
                    .lock()
                    .await
                    .sample(now_ms, engine.use_remote_temperature());
                engine.evaluate(temperature_c, now_ms)
            };

            match result {
                Ok(Evaluation { state, outcome }) => {
                    if outcome == Outcome::InvalidSample {
                        debug!("no usable temperature sample, holding state");
                    }
                    if state != applied {
                        apply_actuator_state(state);
                        applied = state;
                    }
                }
                Err(err) => error!("control evaluation failed: {err}"),
            }
        }
    });
}

// Relay outputs hook in here; the host build only reports the change.
fn apply_actuator_state(state: ThermostatState) {
    info!(state = state.as_str(), "actuator state applied");
}

fn spawn_state_publish_loop(app_state: AppState, publish_interval_ms: u64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(publish_interval_ms));
        loop {
            interval.tick().await;

            let now_ms = monotonic_ms();
            let payload = {
                let engine = app_state.engine.lock().await;
                let temperature_c = app_state
                    .sensors
                    .lock()
                    .await
                    .sample(now_ms, engine.use_remote_temperature());
                serde_json::to_vec(&engine.state_payload(temperature_c))
            };

            match payload {
                Ok(body) => {
                    if let Err(err) = app_state
                        .mqtt
                        .publish(TOPIC_CONTROLLER_STATE, QoS::AtLeastOnce, true, body)
                        .await
                    {
                        warn!("controller state publish failed: {err}");
                    }
                }
                Err(err) => warn!("controller state serialization failed: {err}"),
            }
        }
    });
}

async fn handle_mqtt_message(
    app_state: &AppState,
    topic: &str,
    payload: &[u8],
) -> anyhow::Result<()> {
    if payload.len() > MAX_MQTT_PAYLOAD_BYTES {
        warn!(
            "dropping oversized MQTT payload on topic {} ({} bytes)",
            topic,
            payload.len()
        );
        return Ok(());
    }

    let message = std::str::from_utf8(payload).context("non utf8 mqtt payload")?;
    let value = message
        .trim()
        .parse::<f64>()
        .with_context(|| format!("non numeric payload on {topic}"))?;
    let now_ms = monotonic_ms();

    match topic {
        TOPIC_SENSOR_TEMP => {
            let temperature_c = validate_sample(value)?;
            app_state.sensors.lock().await.local.update(temperature_c, now_ms);
        }
        TOPIC_SENSOR_HUMIDITY => {
            if value.is_finite() && (0.0..=100.0).contains(&value) {
                app_state.sensors.lock().await.humidity = value;
            } else {
                debug!("ignoring implausible humidity {value}");
            }
        }
        _ => {}
    }

    Ok(())
}

async fn handle_get_status(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    status_response(&state, units_param(&params)).await
}

async fn handle_set_mode(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let value = match required_param(&params, "value") {
        Ok(value) => value,
        Err(response) => return response,
    };

    let result = match value.parse::<ThermostatMode>() {
        Ok(mode) => state.engine.lock().await.set_mode(mode),
        Err(err) => Err(err),
    };
    respond(&state, units_param(&params), result).await
}

async fn handle_set_state(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let value = match required_param(&params, "value") {
        Ok(value) => value,
        Err(response) => return response,
    };

    let result = match value.parse::<ThermostatState>() {
        Ok(target) => state.engine.lock().await.set_state(target),
        Err(err) => Err(err),
    };
    respond(&state, units_param(&params), result).await
}

async fn handle_set_setpoint(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    update_setpoint(state, params, SetpointEdge::Single).await
}

async fn handle_set_setpoint_low(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    update_setpoint(state, params, SetpointEdge::Low).await
}

async fn handle_set_setpoint_high(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    update_setpoint(state, params, SetpointEdge::High).await
}

async fn update_setpoint(
    state: AppState,
    params: HashMap<String, String>,
    edge: SetpointEdge,
) -> Response {
    let units = units_param(&params);
    let setpoint_c = match temperature_param(&params, units) {
        Ok(value) => value,
        Err(response) => return response,
    };

    let result = state
        .engine
        .lock()
        .await
        .set_setpoint_and_resume(edge, setpoint_c);
    respond(&state, units, result).await
}

async fn handle_set_remote_temperature(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let units = units_param(&params);
    let value = match temperature_param(&params, units) {
        Ok(value) => value,
        Err(response) => return response,
    };

    let result = state
        .sensors
        .lock()
        .await
        .set_remote(value, monotonic_ms());
    if let Err(err) = result {
        return control_error_response(&err);
    }

    status_response(&state, units).await
}

async fn handle_get_settings(State(state): State<AppState>) -> impl IntoResponse {
    let engine = state.engine.lock().await;
    Json(settings_view(&engine))
}

async fn handle_set_settings(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let screen_imperial = match optional_bool_param(&params, "screenImperial") {
        Ok(value) => value,
        Err(response) => return response,
    };
    let remote_temperature = match optional_bool_param(&params, "remoteTemperature") {
        Ok(value) => value,
        Err(response) => return response,
    };

    let mut engine = state.engine.lock().await;
    if let Some(imperial) = screen_imperial {
        if let Err(err) = engine.set_screen_imperial(imperial) {
            return control_error_response(&err);
        }
    }
    if let Some(remote) = remote_temperature {
        if let Err(err) = engine.set_use_remote_temperature(remote) {
            return control_error_response(&err);
        }
    }

    Json(settings_view(&engine)).into_response()
}

async fn handle_factory_reset(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let result = state.engine.lock().await.factory_reset();
    if result.is_ok() {
        state.sensors.lock().await.remote.clear();
    }
    respond(&state, units_param(&params), result.map(|()| true)).await
}

async fn respond(
    state: &AppState,
    units: DisplayUnit,
    result: Result<bool, ControlError>,
) -> Response {
    match result {
        Ok(changed) => {
            if changed {
                debug!("configuration updated");
            }
            status_response(state, units).await
        }
        Err(err) => control_error_response(&err),
    }
}

async fn status_response(state: &AppState, units: DisplayUnit) -> Response {
    let now_ms = monotonic_ms();
    let status = {
        let engine = state.engine.lock().await;
        let sensors = state.sensors.lock().await;
        let temperature_c = sensors.sample(now_ms, engine.use_remote_temperature());
        engine.status(temperature_c, sensors.humidity, units)
    };

    Json(status).into_response()
}

fn settings_view(engine: &Engine) -> SettingsView {
    SettingsView {
        screen_imperial: engine.screen_imperial(),
        remote_temperature: engine.use_remote_temperature(),
    }
}

fn units_param(params: &HashMap<String, String>) -> DisplayUnit {
    DisplayUnit::from_query(params.get("units").map(String::as_str))
}

fn required_param<'a>(
    params: &'a HashMap<String, String>,
    key: &str,
) -> Result<&'a str, Response> {
    params.get(key).map(String::as_str).ok_or_else(|| {
        error_response(
            StatusCode::BAD_REQUEST,
            &format!("Missing '{key}' parameter"),
        )
    })
}

fn temperature_param(
    params: &HashMap<String, String>,
    units: DisplayUnit,
) -> Result<f64, Response> {
    let value = required_param(params, "value")?;
    value
        .trim()
        .parse::<f64>()
        .map(|value| units.to_celsius(value))
        .map_err(|_| error_response(StatusCode::BAD_REQUEST, "Invalid temperature value"))
}

fn optional_bool_param(
    params: &HashMap<String, String>,
    key: &str,
) -> Result<Option<bool>, Response> {
    match params.get(key).map(|value| value.trim().to_ascii_lowercase()) {
        None => Ok(None),
        Some(value) => match value.as_str() {
            "true" | "1" | "on" => Ok(Some(true)),
            "false" | "0" | "off" => Ok(Some(false)),
            _ => Err(error_response(
                StatusCode::BAD_REQUEST,
                &format!("Invalid '{key}' value, expected true or false"),
            )),
        },
    }
}

fn error_status(err: &ControlError) -> StatusCode {
    match err {
        ControlError::Rejected(_) => StatusCode::BAD_REQUEST,
        ControlError::InvalidSample(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ControlError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn control_error_response(err: &ControlError) -> Response {
    let status = error_status(err);
    if status.is_server_error() {
        error!("failed to persist settings: {err}");
    }
    error_response(status, &err.to_string())
}

impl AppStore {
    fn new() -> Self {
        let data_dir = std::env::var("CLIMATE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.climate"));

        Self {
            runtime_path: Arc::new(data_dir.join("runtime.json")),
            settings_path: Arc::new(data_dir.join("settings.bin")),
        }
    }

    async fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        match tokio::fs::read(self.runtime_path.as_ref()).await {
            Ok(raw) => Ok(serde_json::from_slice::<RuntimeConfig>(&raw)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
            Err(err) => Err(err.into()),
        }
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
