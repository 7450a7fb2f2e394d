//! steam_api ネイティブライブラリ
//!
//! `SteamAppId` を設定して `SteamAPI_Init` を呼ぶと、Steamクライアントは
//! そのゲームをプレイ中として扱う

use std::ffi::{c_char, c_int};
use std::path::{Path, PathBuf};

use libloading::Library;
use tracing::{debug, info, warn};

use crate::error::IdlerError;

/// 旧SDK: `bool SteamAPI_Init()`
type InitFn = unsafe extern "C" fn() -> bool;
/// SDK 1.58以降: `ESteamAPIInitResult SteamAPI_InitFlat(SteamErrMsg *)`
type InitFlatFn = unsafe extern "C" fn(*mut c_char) -> c_int;
type ShutdownFn = unsafe extern "C" fn();

/// SteamErrMsg のサイズ
const ERR_MSG_LEN: usize = 1024;

#[derive(Clone, Copy)]
enum Entry {
    Init(InitFn),
    InitFlat(InitFlatFn),
}

/// プラットフォーム既定のライブラリパス
pub fn default_library_path() -> Result<PathBuf, IdlerError> {
    let name = if cfg!(target_os = "windows") {
        if cfg!(target_pointer_width = "64") {
            "steam_api64.dll"
        } else {
            "steam_api.dll"
        }
    } else if cfg!(target_os = "linux") {
        if cfg!(target_pointer_width = "64") {
            "./libsteam_api64.so"
        } else {
            "./libsteam_api32.so"
        }
    } else if cfg!(target_os = "macos") {
        "./libsteam_api.dylib"
    } else {
        return Err(IdlerError::UnsupportedPlatform(
            std::env::consts::OS.to_string(),
        ));
    };
    Ok(PathBuf::from(name))
}

/// 読み込み済みのsteam_api
pub struct SteamApi {
    entry: Entry,
    shutdown: Option<ShutdownFn>,
    initialized: bool,
    // 関数ポインタより長く生きる必要がある
    _library: Library,
}

impl SteamApi {
    /// ライブラリを読み込む
    pub fn load(path: &Path) -> Result<Self, IdlerError> {
        debug!("Loading steam_api from {:?}", path);

        // SAFETY: 読み込むのはValve配布のsteam_apiで、初期化処理に副作用の前提はない
        let library = unsafe { Library::new(path) }
            .map_err(|e| IdlerError::Library(format!("{:?}: {}", path, e)))?;

        // SAFETY: シグネチャはsteam_api.hの宣言どおり
        let entry = unsafe {
            match library.get::<InitFn>(b"SteamAPI_Init\0") {
                Ok(init) => Entry::Init(*init),
                Err(_) => {
                    let init = library.get::<InitFlatFn>(b"SteamAPI_InitFlat\0").map_err(|e| {
                        IdlerError::Library(format!("SteamAPI_Init が見つかりません: {}", e))
                    })?;
                    Entry::InitFlat(*init)
                }
            }
        };
        let shutdown = unsafe { library.get::<ShutdownFn>(b"SteamAPI_Shutdown\0") }
            .ok()
            .map(|f| *f);

        Ok(Self {
            entry,
            shutdown,
            initialized: false,
            _library: library,
        })
    }

    /// 指定したゲームとしてセッションを開始
    pub fn init(&mut self, app_id: u32) -> Result<(), IdlerError> {
        // SteamAppId はランチャーが子プロセスの環境に設定する
        match std::env::var("SteamAppId") {
            Ok(id) if id == app_id.to_string() => {}
            Ok(id) => warn!("SteamAppId is {} but idling app {}", id, app_id),
            Err(_) => warn!("SteamAppId is not set, Steam may use steam_appid.txt"),
        }

        let ok = match self.entry {
            // SAFETY: 引数なし、戻り値はbool
            Entry::Init(init) => unsafe { init() },
            Entry::InitFlat(init) => {
                let mut message = [0 as c_char; ERR_MSG_LEN];
                // SAFETY: SteamErrMsg (char[1024]) を渡す
                let result = unsafe { init(message.as_mut_ptr()) };
                if result != 0 {
                    let bytes: Vec<u8> = message
                        .iter()
                        .take_while(|&&c| c != 0)
                        .map(|&c| c as u8)
                        .collect();
                    warn!(
                        "SteamAPI_InitFlat failed ({}): {}",
                        result,
                        String::from_utf8_lossy(&bytes)
                    );
                }
                result == 0
            }
        };

        if !ok {
            return Err(IdlerError::SessionInit(app_id));
        }

        self.initialized = true;
        info!("Steam API initialized for app {}", app_id);
        Ok(())
    }

    pub fn shutdown(&mut self) {
        if !std::mem::take(&mut self.initialized) {
            return;
        }
        if let Some(shutdown) = self.shutdown {
            debug!("Calling SteamAPI_Shutdown");
            // SAFETY: init成功後に一度だけ呼ぶ
            unsafe { shutdown() };
        }
    }
}

impl Drop for SteamApi {
    fn drop(&mut self) {
        self.shutdown();
    }
}
