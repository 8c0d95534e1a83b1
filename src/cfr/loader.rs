//! Persistence of trained node weights and training progress.
//!
//! Executors delegate saving and resuming to an [`ExecutionLoader`]. The
//! file-based implementation writes a fixed binary layout, all values
//! little-endian, no text encoding:
//!
//! ```text
//! offset 0              u8   visit-tracking flag (0 or 1)
//! offset 1              u32  player count
//! offset 5              u64  iteration count
//! offset 13             f64 × players   utility sums
//! then, per player node in `Game::player_nodes()` order:
//!     f64 × actions     regret sums
//!     f64 × actions     strategy sums
//!     f64               realization-weight sum   (only when flag = 1)
//!     u64               visit count              (only when flag = 1)
//! ```
//!
//! Doubles are stored verbatim (`to_le_bytes` of the IEEE-754 bits), so a
//! save/load round trip is bit-exact. A file whose flag or player count
//! disagrees with the loader's configuration is rejected loudly — loading
//! it anyway would silently misinterpret every following byte.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::cfr::node::NodeRef;
use crate::cfr::utility::UtilityState;

/// Errors raised while saving or loading trained weights.
#[derive(Debug, Error)]
pub enum LoaderError {
    /// Underlying I/O failure. A failed save leaves a partial file behind;
    /// callers must treat it as requiring a re-save, not as a usable state.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// The file tracks visits/realization weight but the requesting
    /// configuration does not, or vice versa.
    #[error("weights file visit-tracking flag is {file}, loader expects {requested}")]
    VisitTrackingMismatch {
        /// Flag stored in the file.
        file: bool,
        /// Flag the loader was configured with.
        requested: bool,
    },

    /// The file was written for a different number of players.
    #[error("weights file holds {file} players, loader expects {requested}")]
    PlayerCountMismatch {
        /// Player count stored in the file.
        file: u32,
        /// Player count the loader was configured with.
        requested: usize,
    },

    /// The file is structurally invalid (bad flag byte, truncated body).
    #[error("malformed weights file: {0}")]
    Malformed(&'static str),
}

/// Persistence collaborator for executors.
///
/// `load_player_nodes` and `save` walk nodes in the exact order the game's
/// `player_nodes()` reports them; the format has no per-node framing, so
/// that order is the schema.
pub trait ExecutionLoader: Send {
    /// Whether this loader persists visits and realization-weight sums.
    ///
    /// Executors compare this against the engines' visit-tracking flag at
    /// construction, so a mismatch fails before any file is touched.
    fn tracks_visits(&self) -> bool;

    /// Whether a previously saved state exists to resume from.
    fn can_load(&self) -> bool;

    /// Fill the given nodes' accumulators from the saved state.
    fn load_player_nodes(&mut self, nodes: &[NodeRef]) -> Result<(), LoaderError>;

    /// Read the saved training-progress snapshot.
    fn load_state(&mut self) -> Result<UtilityState, LoaderError>;

    /// Persist the given nodes' accumulators and the progress snapshot.
    fn save(&mut self, nodes: &[NodeRef], state: &UtilityState) -> Result<(), LoaderError>;
}

/// File-backed [`ExecutionLoader`] using the binary layout described in the
/// module docs.
#[derive(Debug, Clone)]
pub struct FileLoader {
    path: PathBuf,
    num_players: usize,
    track_visits: bool,
}

impl FileLoader {
    /// Create a loader reading and writing `path`.
    ///
    /// `track_visits` must match the engines'
    /// [`crate::cfr::config::EngineConfig::update_visits_and_weight`];
    /// the executors validate the pair at construction.
    pub fn new(path: impl Into<PathBuf>, num_players: usize, track_visits: bool) -> Self {
        Self {
            path: path.into(),
            num_players,
            track_visits,
        }
    }

    /// The file this loader reads and writes.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether this loader persists visits and realization-weight sums.
    pub fn track_visits(&self) -> bool {
        self.track_visits
    }

    /// Validate flag and player count against this loader's configuration,
    /// leaving the reader positioned at the iteration count.
    fn read_header(&self, reader: &mut impl Read) -> Result<(), LoaderError> {
        let flag = match read_u8(reader)? {
            0 => false,
            1 => true,
            _ => return Err(LoaderError::Malformed("flag byte out of range")),
        };
        if flag != self.track_visits {
            return Err(LoaderError::VisitTrackingMismatch {
                file: flag,
                requested: self.track_visits,
            });
        }
        let players = read_u32(reader)?;
        if players as usize != self.num_players {
            return Err(LoaderError::PlayerCountMismatch {
                file: players,
                requested: self.num_players,
            });
        }
        Ok(())
    }
}

impl ExecutionLoader for FileLoader {
    fn tracks_visits(&self) -> bool {
        self.track_visits
    }

    fn can_load(&self) -> bool {
        self.path.is_file()
    }

    fn load_player_nodes(&mut self, nodes: &[NodeRef]) -> Result<(), LoaderError> {
        let mut reader = BufReader::new(File::open(&self.path)?);
        self.read_header(&mut reader)?;

        // Skip the progress snapshot to reach the node region.
        read_u64(&mut reader)?;
        for _ in 0..self.num_players {
            read_f64(&mut reader)?;
        }

        for node in nodes {
            let Some(player) = node.as_player() else {
                continue;
            };
            let actions = player.num_actions();
            player.with_state(|state| -> Result<(), LoaderError> {
                for a in 0..actions {
                    state.regret_sum[a] = read_f64(&mut reader)?;
                }
                for a in 0..actions {
                    state.strat_sum[a] = read_f64(&mut reader)?;
                }
                if self.track_visits {
                    state.real_weight_sum = read_f64(&mut reader)?;
                    state.visits = read_u64(&mut reader)?;
                }
                Ok(())
            })?;
        }
        Ok(())
    }

    fn load_state(&mut self) -> Result<UtilityState, LoaderError> {
        let mut reader = BufReader::new(File::open(&self.path)?);
        self.read_header(&mut reader)?;

        let iterations = read_u64(&mut reader)?;
        let mut utility_sum = vec![0.0; self.num_players];
        for slot in utility_sum.iter_mut() {
            *slot = read_f64(&mut reader)?;
        }
        Ok(UtilityState {
            iterations,
            utility_sum,
        })
    }

    fn save(&mut self, nodes: &[NodeRef], state: &UtilityState) -> Result<(), LoaderError> {
        let mut writer = BufWriter::new(File::create(&self.path)?);

        writer.write_all(&[u8::from(self.track_visits)])?;
        writer.write_all(&(self.num_players as u32).to_le_bytes())?;
        writer.write_all(&state.iterations.to_le_bytes())?;
        for p in 0..self.num_players {
            let sum = state.utility_sum.get(p).copied().unwrap_or(0.0);
            writer.write_all(&sum.to_le_bytes())?;
        }

        for node in nodes {
            let Some(player) = node.as_player() else {
                continue;
            };
            player.with_state(|state| -> Result<(), LoaderError> {
                for &r in &state.regret_sum {
                    writer.write_all(&r.to_le_bytes())?;
                }
                for &s in &state.strat_sum {
                    writer.write_all(&s.to_le_bytes())?;
                }
                if self.track_visits {
                    writer.write_all(&state.real_weight_sum.to_le_bytes())?;
                    writer.write_all(&state.visits.to_le_bytes())?;
                }
                Ok(())
            })?;
        }
        writer.flush()?;
        Ok(())
    }
}

fn read_u8(reader: &mut impl Read) -> io::Result<u8> {
    let mut buf = [0u8; 1];
    reader.read_exact(&mut buf)?;
    Ok(buf[0])
}

fn read_u32(reader: &mut impl Read) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64(reader: &mut impl Read) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_f64(reader: &mut impl Read) -> io::Result<f64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(f64::from_le_bytes(buf))
}
