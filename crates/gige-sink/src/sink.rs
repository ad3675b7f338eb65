//! GigE Vision sink adapter (C7): mirrors the control-flow of a GStreamer
//! sink's `start`/`set_caps`/`render`/`stop` lifecycle without depending on
//! GStreamer itself — the host pipeline is represented purely by the
//! arguments these methods take.

use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use pfnc::PixelFormat;
use thiserror::Error;
use tl_gige::backend::{self, regs, BackendError};
use tl_gige::engine::{self, SharedState, SINK_POLL_TIMEOUT};
use tl_gige::gvsp::{self, FrameGeometry};
use tl_gige::nic;
use tl_gige::socket_set::{self, SocketSet};
use tracing::warn;

/// Pipeline-sink configuration surface: named, typed options with the
/// defaults a freshly-created sink applies at `start`.
#[derive(Debug, Clone)]
pub struct SinkConfig {
    pub interface: String,
    pub serial: String,
    pub genicam: Option<String>,
    pub default_width: u32,
    pub default_height: u32,
    pub default_pixel_format: PixelFormat,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            interface: "127.0.0.1".to_string(),
            serial: "ARV-SINK".to_string(),
            genicam: None,
            default_width: 640,
            default_height: 480,
            default_pixel_format: PixelFormat::Mono16,
        }
    }
}

/// Errors a [`GigeSink`] can report.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("network error: {0}")]
    Io(#[from] std::io::Error),
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("unsupported pipeline format \"{0}\"")]
    UnsupportedFormat(String),
}

/// Embeddable GigE Vision camera sink. Runs the GVCP engine on a background
/// thread and frames rendered buffers toward the stream destination the
/// controlling client programmed into the register backend.
pub struct GigeSink {
    state: Arc<Mutex<SharedState>>,
    cancel: Arc<AtomicBool>,
    engine_thread: Option<JoinHandle<()>>,
    gvsp_socket: UdpSocket,
    frame_id: u16,
    scratch: Vec<u8>,
}

impl GigeSink {
    /// Start the sink: instantiate the backend, resolve the interface,
    /// bind sockets, launch the GVCP engine thread, and apply default
    /// registers.
    pub fn start(config: &SinkConfig) -> Result<Self, SinkError> {
        let iface = nic::resolve(Some(&config.interface))?;

        let mut backend = backend::new("fake", &config.serial, config.genicam.as_deref())?;
        backend.set_inet_address(iface.ip);
        apply_default_registers(backend.as_mut(), config)?;

        let sockets = Arc::new(SocketSet::bind(&iface)?);
        let state = Arc::new(Mutex::new(SharedState::new(backend)));
        let cancel = Arc::new(AtomicBool::new(false));

        let thread_state = state.clone();
        let thread_cancel = cancel.clone();
        let thread_sockets = sockets.clone();
        let engine_thread = std::thread::spawn(move || {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("build current-thread runtime for GVCP engine");
            rt.block_on(engine::run(
                &thread_sockets,
                &thread_state,
                &thread_cancel,
                SINK_POLL_TIMEOUT,
            ));
        });

        let gvsp_socket = socket_set::bind_gvsp_socket(&iface)?;

        Ok(Self {
            state,
            cancel,
            engine_thread: Some(engine_thread),
            gvsp_socket,
            frame_id: 0,
            scratch: Vec::with_capacity(gvsp::GVSP_MAX_PACKET_SIZE as usize),
        })
    }

    /// Negotiate a new format/geometry, translating the pipeline's format
    /// string into a GigE Vision pixel format and mirroring the geometry
    /// into the register set.
    pub fn set_caps(
        &mut self,
        format: &str,
        width: u32,
        height: u32,
        _bpp: u32,
        _depth: u32,
    ) -> Result<(), SinkError> {
        let pixel_format =
            PixelFormat::from_pipeline_format(format).ok_or_else(|| SinkError::UnsupportedFormat(format.to_string()))?;

        let mut guard = self.state.lock().unwrap();
        let backend = guard.backend.as_mut();
        backend.write_register(regs::WIDTH, width)?;
        backend.write_register(regs::HEIGHT, height)?;
        backend.write_register(regs::PIXEL_FORMAT, pixel_format.code().raw())?;
        Ok(())
    }

    /// Frame and send one rendered buffer, gated on control privilege and
    /// acquisition status. Returns success silently when gated or when the
    /// stream destination is unset — GVSP is best-effort and a dropped
    /// buffer is not an error.
    pub fn render(&mut self, buffer: &[u8], pts_ns: Option<u64>) -> Result<(), SinkError> {
        let (gated, ip, port, packet_size, geometry) = {
            let guard = self.state.lock().unwrap();
            let backend = guard.backend.as_ref();
            let privilege = backend.read_register(regs::CONTROL_CHANNEL_PRIVILEGE)?;
            let acquisition_status = backend.read_register(regs::ACQUISITION_STATUS)?;
            let gated = privilege == 0 || acquisition_status == 0;

            let ip = Ipv4Addr::from(backend.read_register(regs::STREAM_CHANNEL_0_IP_ADDRESS)?);
            let port = backend.read_register(regs::STREAM_CHANNEL_0_PORT)? as u16;
            let packet_size = backend.read_register(regs::STREAM_CHANNEL_0_PACKET_SIZE)? & 0xFFFF;
            let geometry = FrameGeometry {
                pixel_format: backend.read_register(regs::PIXEL_FORMAT)?,
                width: backend.read_register(regs::WIDTH)?,
                height: backend.read_register(regs::HEIGHT)?,
            };
            (gated, ip, port, packet_size, geometry)
        };

        if gated || ip.is_unspecified() || port == 0 {
            return Ok(());
        }

        let timestamp_ns = pts_ns.unwrap_or_else(now_ns);
        let dest = SocketAddr::new(std::net::IpAddr::V4(ip), port);
        self.frame_id = gvsp::next_frame_id(self.frame_id);
        gvsp::send_frame(
            &self.gvsp_socket,
            dest,
            &mut self.scratch,
            self.frame_id,
            geometry,
            buffer,
            timestamp_ns,
            packet_size,
        );
        Ok(())
    }

    /// Stop the engine thread and release the sockets.
    pub fn stop(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
        if let Some(handle) = self.engine_thread.take() {
            if handle.join().is_err() {
                warn!("GVCP engine thread panicked");
            }
        }
    }
}

impl Drop for GigeSink {
    fn drop(&mut self) {
        self.stop();
    }
}

fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_nanos() as u64
}

fn apply_default_registers(
    backend: &mut dyn tl_gige::RegisterBackend,
    config: &SinkConfig,
) -> Result<(), BackendError> {
    backend.write_register(regs::SENSOR_WIDTH, config.default_width)?;
    backend.write_register(regs::SENSOR_HEIGHT, config.default_height)?;
    backend.write_register(regs::WIDTH, config.default_width)?;
    backend.write_register(regs::HEIGHT, config.default_height)?;
    backend.write_register(regs::X_OFFSET, 0)?;
    backend.write_register(regs::Y_OFFSET, 0)?;
    backend.write_register(regs::BINNING_HORIZONTAL, 1)?;
    backend.write_register(regs::BINNING_VERTICAL, 1)?;
    backend.write_register(regs::PIXEL_FORMAT, config.default_pixel_format.code().raw())?;
    Ok(())
}
