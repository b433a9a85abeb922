// src/sim/traci.rs
//
// SUMO backend over the TraCI TCP protocol.
//
// Wire format (all integers big-endian):
//   message  := u32 total_len (incl. itself) ++ command*
//   command  := u8 len ++ u8 id ++ content            (len <= 255)
//             | u8 0 ++ u32 len ++ u8 id ++ content    (extended)
//   response := status command [++ result command]
//   status   := id ++ u8 result (0 = ok) ++ string description
//   string   := u32 len ++ utf8 bytes
//
// Only the handful of variables the control loop needs are implemented.

use std::io::{Read, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use crate::config::ScenarioConfig;
use crate::error::SimError;
use crate::sim::{Simulator, SimulatorLauncher};
use crate::types::IntersectionId;

// Command ids.
const CMD_SIMSTEP: u8 = 0x02;
const CMD_CLOSE: u8 = 0x7f;
const CMD_GET_TL_VARIABLE: u8 = 0xa2;
const CMD_GET_LANE_VARIABLE: u8 = 0xa3;
const CMD_GET_SIM_VARIABLE: u8 = 0xab;
const CMD_SET_TL_VARIABLE: u8 = 0xc2;
/// Get-command responses echo the command id plus this offset.
const RESPONSE_OFFSET: u8 = 0x10;

// Variable ids.
const VAR_ID_LIST: u8 = 0x00;
const TL_CONTROLLED_LANES: u8 = 0x26;
const TL_CURRENT_PHASE: u8 = 0x28;
const TL_PHASE_DURATION: u8 = 0x24;
const LANE_LAST_STEP_VEHICLE_NUMBER: u8 = 0x10;
const LANE_LAST_STEP_HALTING_NUMBER: u8 = 0x14;
const SIM_MIN_EXPECTED_VEHICLES: u8 = 0x7d;

// Type tags.
const TYPE_INTEGER: u8 = 0x09;
const TYPE_DOUBLE: u8 = 0x0b;
const TYPE_STRINGLIST: u8 = 0x0e;

const RTYPE_OK: u8 = 0x00;

/// Upper bound on a single response; anything larger is a framing error.
const MAX_MESSAGE_LEN: usize = 64 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

/// Outgoing byte buffer.
#[derive(Debug, Default, Clone)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn i32(&mut self, v: i32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn f64(&mut self, v: f64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn string(&mut self, s: &str) -> &mut Self {
        self.buf
            .extend_from_slice(&(s.len() as u32).to_be_bytes());
        self.buf.extend_from_slice(s.as_bytes());
        self
    }

    pub fn string_list(&mut self, items: &[&str]) -> &mut Self {
        self.buf
            .extend_from_slice(&(items.len() as u32).to_be_bytes());
        for s in items {
            self.string(s);
        }
        self
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Frame one command (id + content) with the short or extended length header.
pub fn frame_command(id: u8, content: &[u8]) -> Vec<u8> {
    let short_len = 1 + 1 + content.len();
    let mut out = Vec::with_capacity(short_len + 4);
    if short_len <= 255 {
        out.push(short_len as u8);
    } else {
        out.push(0);
        out.extend_from_slice(&((1 + 4 + 1 + content.len()) as u32).to_be_bytes());
    }
    out.push(id);
    out.extend_from_slice(content);
    out
}

/// Prefix a sequence of framed commands with the message length.
pub fn frame_message(commands: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(commands.len() + 4);
    out.extend_from_slice(&((commands.len() + 4) as u32).to_be_bytes());
    out.extend_from_slice(commands);
    out
}

/// Incoming byte buffer with a read cursor.
#[derive(Debug, Clone)]
pub struct Storage {
    buf: Vec<u8>,
    pos: usize,
}

impl Storage {
    pub fn new(buf: Vec<u8>) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&[u8], SimError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| {
                SimError::Protocol(format!(
                    "truncated response: need {n} bytes at offset {}, have {}",
                    self.pos,
                    self.buf.len()
                ))
            })?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8, SimError> {
        Ok(self.take(1)?[0])
    }

    pub fn i32(&mut self) -> Result<i32, SimError> {
        let b = self.take(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn u32(&mut self) -> Result<u32, SimError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn f64(&mut self) -> Result<f64, SimError> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(f64::from_be_bytes(raw))
    }

    pub fn string(&mut self) -> Result<String, SimError> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| SimError::Protocol(format!("invalid utf-8 in string: {e}")))
    }

    pub fn string_list(&mut self) -> Result<Vec<String>, SimError> {
        let n = self.u32()? as usize;
        let mut out = Vec::with_capacity(n.min(4096));
        for _ in 0..n {
            out.push(self.string()?);
        }
        Ok(out)
    }

    /// Read a command header; returns (command id, bytes remaining in it).
    fn command_header(&mut self) -> Result<(u8, usize), SimError> {
        let short = self.u8()? as usize;
        let (len, header) = if short == 0 {
            (self.u32()? as usize, 1 + 4)
        } else {
            (short, 1)
        };
        let id = self.u8()?;
        let rest = len
            .checked_sub(header + 1)
            .ok_or_else(|| SimError::Protocol(format!("bad command length {len}")))?;
        Ok((id, rest))
    }

    /// Consume the status part of a response and check it refers to `command`
    /// and succeeded.
    pub fn expect_status(&mut self, command: u8) -> Result<(), SimError> {
        let (id, _) = self.command_header()?;
        let result = self.u8()?;
        let description = self.string()?;
        if id != command {
            return Err(SimError::Protocol(format!(
                "status for command 0x{id:02x}, expected 0x{command:02x}"
            )));
        }
        if result != RTYPE_OK {
            return Err(SimError::Command {
                command,
                message: description,
            });
        }
        Ok(())
    }

    /// Consume a get-variable result header and return the value's type tag.
    pub fn expect_variable(&mut self, command: u8, variable: u8) -> Result<u8, SimError> {
        let (id, _) = self.command_header()?;
        let expected = command.wrapping_add(RESPONSE_OFFSET);
        if id != expected {
            return Err(SimError::Protocol(format!(
                "result command 0x{id:02x}, expected 0x{expected:02x}"
            )));
        }
        let var = self.u8()?;
        if var != variable {
            return Err(SimError::Protocol(format!(
                "result variable 0x{var:02x}, expected 0x{variable:02x}"
            )));
        }
        let _object_id = self.string()?;
        self.u8()
    }
}

fn expect_type(actual: u8, expected: u8) -> Result<(), SimError> {
    if actual == expected {
        Ok(())
    } else {
        Err(SimError::Protocol(format!(
            "value type 0x{actual:02x}, expected 0x{expected:02x}"
        )))
    }
}

fn non_negative(v: i32, what: &str) -> Result<u32, SimError> {
    u32::try_from(v).map_err(|_| SimError::Protocol(format!("negative {what}: {v}")))
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// A TraCI connection, optionally owning the SUMO child process.
pub struct TraciSimulator {
    stream: Option<TcpStream>,
    child: Option<Child>,
}

impl TraciSimulator {
    /// Wrap an already-connected stream (no process ownership).
    pub fn from_stream(stream: TcpStream) -> Result<Self, SimError> {
        let mut sim = Self {
            stream: None,
            child: None,
        };
        sim.attach(stream)?;
        Ok(sim)
    }

    /// Own a freshly spawned process before any connection exists, so an
    /// early return kills it on drop.
    fn spawned(child: Child) -> Self {
        Self {
            stream: None,
            child: Some(child),
        }
    }

    fn attach(&mut self, stream: TcpStream) -> Result<(), SimError> {
        stream.set_nodelay(true)?;
        self.stream = Some(stream);
        Ok(())
    }

    fn child_status(&mut self) -> Result<Option<ExitStatus>, SimError> {
        match self.child.as_mut() {
            Some(child) => Ok(child.try_wait()?),
            None => Ok(None),
        }
    }

    fn stream(&mut self) -> Result<&mut TcpStream, SimError> {
        self.stream.as_mut().ok_or(SimError::Closed)
    }

    /// Send one command and return the full response payload.
    fn exchange(&mut self, id: u8, content: &[u8]) -> Result<Storage, SimError> {
        let message = frame_message(&frame_command(id, content));
        let stream = self.stream()?;
        stream.write_all(&message)?;
        stream.flush()?;

        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf)?;
        let total = u32::from_be_bytes(len_buf) as usize;
        if !(4..=MAX_MESSAGE_LEN).contains(&total) {
            return Err(SimError::Protocol(format!("bad message length {total}")));
        }
        let mut payload = vec![0u8; total - 4];
        stream.read_exact(&mut payload)?;
        Ok(Storage::new(payload))
    }

    fn get(&mut self, command: u8, variable: u8, object: &str) -> Result<(Storage, u8), SimError> {
        let mut content = Writer::new();
        content.u8(variable).string(object);
        let mut resp = self.exchange(command, content.bytes())?;
        resp.expect_status(command)?;
        let ty = resp.expect_variable(command, variable)?;
        Ok((resp, ty))
    }

    fn get_int(&mut self, command: u8, variable: u8, object: &str) -> Result<i32, SimError> {
        let (mut resp, ty) = self.get(command, variable, object)?;
        expect_type(ty, TYPE_INTEGER)?;
        resp.i32()
    }

    fn get_string_list(
        &mut self,
        command: u8,
        variable: u8,
        object: &str,
    ) -> Result<Vec<String>, SimError> {
        let (mut resp, ty) = self.get(command, variable, object)?;
        expect_type(ty, TYPE_STRINGLIST)?;
        resp.string_list()
    }
}

impl Simulator for TraciSimulator {
    fn step(&mut self) -> Result<(), SimError> {
        // Target time 0.0 means "advance one step".
        let mut content = Writer::new();
        content.f64(0.0);
        let mut resp = self.exchange(CMD_SIMSTEP, content.bytes())?;
        resp.expect_status(CMD_SIMSTEP)
    }

    fn traffic_light_ids(&mut self) -> Result<Vec<IntersectionId>, SimError> {
        self.get_string_list(CMD_GET_TL_VARIABLE, VAR_ID_LIST, "")
    }

    fn controlled_lanes(&mut self, tl_id: &str) -> Result<Vec<String>, SimError> {
        self.get_string_list(CMD_GET_TL_VARIABLE, TL_CONTROLLED_LANES, tl_id)
    }

    fn lane_vehicle_count(&mut self, lane_id: &str) -> Result<u32, SimError> {
        let v = self.get_int(CMD_GET_LANE_VARIABLE, LANE_LAST_STEP_VEHICLE_NUMBER, lane_id)?;
        non_negative(v, "vehicle count")
    }

    fn lane_halting_count(&mut self, lane_id: &str) -> Result<u32, SimError> {
        let v = self.get_int(CMD_GET_LANE_VARIABLE, LANE_LAST_STEP_HALTING_NUMBER, lane_id)?;
        non_negative(v, "halting count")
    }

    fn min_expected_agents(&mut self) -> Result<u32, SimError> {
        let v = self.get_int(CMD_GET_SIM_VARIABLE, SIM_MIN_EXPECTED_VEHICLES, "")?;
        non_negative(v, "expected vehicles")
    }

    fn current_phase(&mut self, tl_id: &str) -> Result<u32, SimError> {
        let v = self.get_int(CMD_GET_TL_VARIABLE, TL_CURRENT_PHASE, tl_id)?;
        non_negative(v, "phase index")
    }

    fn set_phase_duration(&mut self, tl_id: &str, seconds: f64) -> Result<(), SimError> {
        let mut content = Writer::new();
        content
            .u8(TL_PHASE_DURATION)
            .string(tl_id)
            .u8(TYPE_DOUBLE)
            .f64(seconds);
        let mut resp = self.exchange(CMD_SET_TL_VARIABLE, content.bytes())?;
        resp.expect_status(CMD_SET_TL_VARIABLE)
    }

    fn close(&mut self) -> Result<(), SimError> {
        if self.stream.is_none() {
            return Err(SimError::Closed);
        }
        let result = self
            .exchange(CMD_CLOSE, &[])
            .and_then(|mut resp| resp.expect_status(CMD_CLOSE));
        self.stream = None;

        if let Some(mut child) = self.child.take() {
            if result.is_err() {
                let _ = child.kill();
            }
            let status = child.wait()?;
            tracing::debug!(%status, "sumo exited");
        }
        result
    }

    fn name(&self) -> &str {
        "traci"
    }
}

impl Drop for TraciSimulator {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

// ---------------------------------------------------------------------------
// Launcher
// ---------------------------------------------------------------------------

/// Spawns `sumo` / `sumo-gui` and connects to its TraCI port.
#[derive(Debug, Clone)]
pub struct TraciLauncher {
    /// How long to wait for SUMO to accept the TraCI connection.
    pub connect_timeout: Duration,
    /// Socket read timeout for every exchange.
    pub io_timeout: Duration,
    /// Binary override; defaults to `$SUMO_HOME/bin/sumo[-gui]` or PATH.
    pub binary: Option<PathBuf>,
}

impl Default for TraciLauncher {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(20),
            io_timeout: Duration::from_secs(120),
            binary: None,
        }
    }
}

/// Resolve the SUMO binary, preferring `$SUMO_HOME/bin`.
pub fn resolve_sumo_binary(gui: bool) -> PathBuf {
    let name = match (gui, cfg!(windows)) {
        (true, true) => "sumo-gui.exe",
        (true, false) => "sumo-gui",
        (false, true) => "sumo.exe",
        (false, false) => "sumo",
    };
    if let Ok(home) = std::env::var("SUMO_HOME") {
        let candidate = PathBuf::from(home).join("bin").join(name);
        if candidate.is_file() {
            return candidate;
        }
    }
    PathBuf::from(name)
}

fn free_local_port() -> Result<u16, SimError> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
    Ok(listener.local_addr()?.port())
}

impl TraciLauncher {
    fn wait_for_connection(
        &self,
        sim: &mut TraciSimulator,
        port: u16,
    ) -> Result<TcpStream, SimError> {
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        let started = Instant::now();
        loop {
            match TcpStream::connect_timeout(&addr, Duration::from_millis(500)) {
                Ok(stream) => return Ok(stream),
                Err(err) => {
                    if let Some(status) = sim.child_status()? {
                        return Err(SimError::Protocol(format!(
                            "sumo exited before accepting a connection ({status}): {err}"
                        )));
                    }
                    if started.elapsed() >= self.connect_timeout {
                        return Err(SimError::ConnectTimeout {
                            port,
                            waited_ms: started.elapsed().as_millis() as u64,
                        });
                    }
                    std::thread::sleep(Duration::from_millis(100));
                }
            }
        }
    }
}

impl SimulatorLauncher for TraciLauncher {
    type Sim = TraciSimulator;

    fn launch(&mut self, scenario: &ScenarioConfig) -> Result<TraciSimulator, SimError> {
        let binary = self
            .binary
            .clone()
            .unwrap_or_else(|| resolve_sumo_binary(scenario.gui));
        let port = free_local_port()?;

        let child = Command::new(&binary)
            .arg("-c")
            .arg(&scenario.cfg_path)
            .arg("--step-length")
            .arg(scenario.step_length_s.to_string())
            .arg("--no-warnings")
            .arg("true")
            .arg("--remote-port")
            .arg(port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .spawn()
            .map_err(|source| SimError::Spawn {
                binary: binary.display().to_string(),
                source,
            })?;

        tracing::info!(
            binary = %binary.display(),
            cfg = %scenario.cfg_path.display(),
            port,
            "sumo started"
        );

        let mut sim = TraciSimulator::spawned(child);
        let stream = self.wait_for_connection(&mut sim, port)?;
        stream.set_read_timeout(Some(self.io_timeout))?;
        stream.set_write_timeout(Some(self.io_timeout))?;
        sim.attach(stream)?;
        Ok(sim)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn status(command: u8, result: u8, description: &str) -> Vec<u8> {
        let mut content = Writer::new();
        content.u8(result).string(description);
        frame_command(command, content.bytes())
    }

    fn string_list_result(command: u8, variable: u8, object: &str, items: &[&str]) -> Vec<u8> {
        let mut content = Writer::new();
        content
            .u8(variable)
            .string(object)
            .u8(TYPE_STRINGLIST)
            .string_list(items);
        frame_command(command + RESPONSE_OFFSET, content.bytes())
    }

    fn int_result(command: u8, variable: u8, object: &str, v: i32) -> Vec<u8> {
        let mut content = Writer::new();
        content.u8(variable).string(object).u8(TYPE_INTEGER).i32(v);
        frame_command(command + RESPONSE_OFFSET, content.bytes())
    }

    /// Serve canned responses, one per request, then return what was received.
    fn fake_server(responses: Vec<Vec<u8>>) -> (u16, thread::JoinHandle<Vec<Vec<u8>>>) {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let mut requests = Vec::new();
            for resp in responses {
                let mut len = [0u8; 4];
                conn.read_exact(&mut len).unwrap();
                let mut body = vec![0u8; u32::from_be_bytes(len) as usize - 4];
                conn.read_exact(&mut body).unwrap();
                requests.push(body);
                conn.write_all(&frame_message(&resp)).unwrap();
            }
            requests
        });
        (port, handle)
    }

    fn connect(port: u16) -> TraciSimulator {
        let stream = TcpStream::connect((Ipv4Addr::LOCALHOST, port)).unwrap();
        TraciSimulator::from_stream(stream).unwrap()
    }

    #[test]
    fn short_and_extended_command_framing() {
        let short = frame_command(0x02, &[0u8; 8]);
        assert_eq!(short[0], 10);
        assert_eq!(short[1], 0x02);

        let long = frame_command(0xa2, &[7u8; 300]);
        assert_eq!(long[0], 0);
        assert_eq!(u32::from_be_bytes([long[1], long[2], long[3], long[4]]), 306);
        assert_eq!(long[5], 0xa2);
        assert_eq!(long.len(), 306);

        // The extended header parses back to the same command.
        let mut storage = Storage::new(long);
        let (id, rest) = storage.command_header().unwrap();
        assert_eq!((id, rest), (0xa2, 300));
    }

    #[test]
    fn truncated_storage_is_protocol_error() {
        let mut storage = Storage::new(vec![0, 0, 0, 9, b'a']);
        assert!(matches!(storage.string(), Err(SimError::Protocol(_))));
    }

    #[test]
    fn queries_round_trip_against_fake_server() {
        let mut lanes_resp = status(CMD_GET_TL_VARIABLE, RTYPE_OK, "");
        lanes_resp.extend(string_list_result(
            CMD_GET_TL_VARIABLE,
            TL_CONTROLLED_LANES,
            "J1",
            &["n_0", "n_0", "e_0"],
        ));
        let mut halting_resp = status(CMD_GET_LANE_VARIABLE, RTYPE_OK, "");
        halting_resp.extend(int_result(
            CMD_GET_LANE_VARIABLE,
            LANE_LAST_STEP_HALTING_NUMBER,
            "n_0",
            4,
        ));
        let step_resp = {
            let mut r = status(CMD_SIMSTEP, RTYPE_OK, "");
            // subscription result count
            r.extend_from_slice(&0i32.to_be_bytes());
            r
        };
        let close_resp = status(CMD_CLOSE, RTYPE_OK, "");

        let (port, server) = fake_server(vec![lanes_resp, halting_resp, step_resp, close_resp]);
        let mut sim = connect(port);

        assert_eq!(sim.controlled_lanes("J1").unwrap(), vec!["n_0", "n_0", "e_0"]);
        assert_eq!(sim.lane_halting_count("n_0").unwrap(), 4);
        sim.step().unwrap();
        sim.close().unwrap();
        assert!(matches!(sim.step(), Err(SimError::Closed)));

        let requests = server.join().unwrap();
        assert_eq!(requests.len(), 4);
        // get TL variable: len, cmd, var, string("J1")
        assert_eq!(requests[0][1], CMD_GET_TL_VARIABLE);
        assert_eq!(requests[0][2], TL_CONTROLLED_LANES);
        assert_eq!(requests[2][1], CMD_SIMSTEP);
        assert_eq!(requests[3][1], CMD_CLOSE);
    }

    #[test]
    fn error_status_surfaces_description() {
        let resp = status(CMD_GET_LANE_VARIABLE, 0x01, "Lane 'x' is not known");
        let (port, server) = fake_server(vec![resp]);
        let mut sim = connect(port);

        match sim.lane_vehicle_count("x") {
            Err(SimError::Command { command, message }) => {
                assert_eq!(command, CMD_GET_LANE_VARIABLE);
                assert!(message.contains("not known"));
            }
            other => panic!("unexpected: {other:?}"),
        }
        server.join().unwrap();
    }

    #[test]
    fn binary_name_follows_gui_flag() {
        let headless = resolve_sumo_binary(false);
        let gui = resolve_sumo_binary(true);
        assert!(headless.to_string_lossy().contains("sumo"));
        assert!(gui.to_string_lossy().contains("sumo-gui"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn connect_timeout_kills_spawned_process() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("pid");
        // `sh -c` runs the scenario path as a script: it records its pid and
        // keeps running without ever opening the TraCI port.
        let scenario = ScenarioConfig {
            cfg_path: PathBuf::from(format!(
                "echo $$ > '{}'; exec sleep 30",
                pid_file.display()
            )),
            gui: false,
            step_length_s: 1.0,
        };
        let mut launcher = TraciLauncher {
            connect_timeout: Duration::from_millis(600),
            io_timeout: Duration::from_secs(1),
            binary: Some(PathBuf::from("/bin/sh")),
        };

        let err = launcher.launch(&scenario).err().unwrap();
        assert!(matches!(err, SimError::ConnectTimeout { .. }), "{err:?}");

        let pid: u32 = std::fs::read_to_string(&pid_file)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        assert!(
            !std::path::Path::new(&format!("/proc/{pid}")).exists(),
            "sumo stand-in {pid} still running"
        );
    }
}
