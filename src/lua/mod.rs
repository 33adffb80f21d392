//! Lua host for repository scripts.
//!
//! Every extension runs in its own Lua 5.4 state seeded with the host API from
//! `prelude.lua` plus three native functions: `Require` (shared libraries from
//! `<repo>/lib`, loaded once per state), `GET` and `POST` (through the shared
//! [`HttpSession`]). A script returns its extension table; everything the
//! runner inspects repeatedly is read once at load time, functions stay in the
//! Lua registry until called.

use crate::extension::{Chapter, Extension, ExtensionLoader, Listing, ListingItem, Novel, NovelInfo};
use crate::filters::{Filter, FilterKind, ParamMap, ParamValue};
use crate::http::{HttpResponse, HttpSession};
use crate::script_metadata::ScriptMetadata;
use anyhow::{Context, Result, anyhow, bail};
use mlua::{Function, Lua, RegistryKey, Table, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const PRELUDE: &str = include_str!("prelude.lua");
const LIBRARY_CACHE: &str = "extension_tester.libraries";

/// Loads `.lua` libraries and extensions of one repository.
pub struct LuaLoader {
    lib_dir: PathBuf,
    http: Arc<HttpSession>,
}

impl LuaLoader {
    pub fn new(repo_dir: &Path, http: Arc<HttpSession>) -> Self {
        Self {
            lib_dir: repo_dir.join("lib"),
            http,
        }
    }

    fn new_state(&self) -> Result<Lua> {
        let lua = Lua::new();
        install_host(&lua, &self.lib_dir, &self.http).context("installing Lua host API")?;
        Ok(lua)
    }
}

impl ExtensionLoader for LuaLoader {
    fn load_library(&self, path: &Path) -> Result<ScriptMetadata> {
        let source = read_script(path)?;
        let metadata = ScriptMetadata::from_source(&source)
            .with_context(|| format!("metadata header of {}", path.display()))?;
        let lua = Lua::new();
        lua.load(source.as_str())
            .set_name(chunk_name(path))
            .into_function()
            .with_context(|| format!("compiling {}", path.display()))?;
        Ok(metadata)
    }

    fn load_extension(&self, path: &Path) -> Result<Box<dyn Extension>> {
        let source = read_script(path)?;
        let metadata = ScriptMetadata::from_source(&source)
            .with_context(|| format!("metadata header of {}", path.display()))?;
        let lua = self.new_state()?;
        let loaded = read_extension(&lua, &source, path, &metadata)?;
        Ok(Box::new(LuaExtension {
            lua,
            table: loaded.table,
            listing_fns: loaded.listing_fns,
            profile: loaded.profile,
            metadata,
        }))
    }
}

/// An extension table living in its own Lua state.
pub struct LuaExtension {
    lua: Lua,
    table: RegistryKey,
    listing_fns: Vec<Option<RegistryKey>>,
    profile: Profile,
    metadata: ScriptMetadata,
}

/// Values read once from the extension table.
struct Profile {
    id: i32,
    name: String,
    base_url: String,
    image_url: String,
    has_search: bool,
    is_search_incrementing: bool,
    has_cloudflare: bool,
    start_index: i32,
    settings: Vec<Filter>,
    search_filters: Vec<Filter>,
    listings: Listing,
}

struct Loaded {
    table: RegistryKey,
    listing_fns: Vec<Option<RegistryKey>>,
    profile: Profile,
}

impl LuaExtension {
    fn function(&self, name: &str) -> Result<Function<'_>> {
        let table: Table = self.lua.registry_value(&self.table)?;
        table
            .get::<_, Option<Function>>(name)?
            .ok_or_else(|| anyhow!("extension `{}` has no `{name}` function", self.profile.name))
    }
}

impl Extension for LuaExtension {
    fn id(&self) -> i32 {
        self.profile.id
    }

    fn name(&self) -> &str {
        &self.profile.name
    }

    fn base_url(&self) -> &str {
        &self.profile.base_url
    }

    fn image_url(&self) -> &str {
        &self.profile.image_url
    }

    fn has_search(&self) -> bool {
        self.profile.has_search
    }

    fn is_search_incrementing(&self) -> bool {
        self.profile.is_search_incrementing
    }

    fn has_cloudflare(&self) -> bool {
        self.profile.has_cloudflare
    }

    fn start_index(&self) -> i32 {
        self.profile.start_index
    }

    fn settings_model(&self) -> Vec<Filter> {
        self.profile.settings.clone()
    }

    fn search_filters(&self) -> Vec<Filter> {
        self.profile.search_filters.clone()
    }

    fn listings(&self) -> Listing {
        self.profile.listings.clone()
    }

    fn get_listing(&self, item: &ListingItem, params: &ParamMap) -> Result<Vec<NovelInfo>> {
        let func = match self.listing_fns.get(item.handle) {
            Some(Some(key)) => self.lua.registry_value::<Function>(key)?,
            Some(None) => self.function("search")?,
            None => bail!("unknown listing `{}`", item.name),
        };
        let data = params_table(&self.lua, params)?;
        let value: Value = func
            .call(data)
            .with_context(|| format!("listing `{}`", item.name))?;
        novel_infos_from(value).with_context(|| format!("result of listing `{}`", item.name))
    }

    fn parse_novel(&self, url: &str, load_chapters: bool) -> Result<Novel> {
        let value: Value = self
            .function("parseNovel")?
            .call((url, load_chapters))
            .with_context(|| format!("parseNovel({url})"))?;
        match value {
            Value::Table(table) => novel_from(&table),
            other => bail!("parseNovel({url}) returned {}", other.type_name()),
        }
    }

    fn get_passage(&self, chapter_url: &str) -> Result<Vec<u8>> {
        let value: Value = self
            .function("getPassage")?
            .call(chapter_url)
            .with_context(|| format!("getPassage({chapter_url})"))?;
        match value {
            Value::String(text) => Ok(text.as_bytes().to_vec()),
            Value::Nil => Ok(Vec::new()),
            other => bail!("getPassage({chapter_url}) returned {}", other.type_name()),
        }
    }

    fn search(&self, params: &ParamMap) -> Result<Vec<NovelInfo>> {
        let data = params_table(&self.lua, params)?;
        let value: Value = self.function("search")?.call(data).context("search")?;
        novel_infos_from(value).context("result of search")
    }

    fn metadata(&self) -> &ScriptMetadata {
        &self.metadata
    }
}

fn read_script(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn chunk_name(path: &Path) -> String {
    let file = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("@{file}")
}

fn install_host(lua: &Lua, lib_dir: &Path, http: &Arc<HttpSession>) -> mlua::Result<()> {
    let globals = lua.globals();
    lua.set_named_registry_value(LIBRARY_CACHE, lua.create_table()?)?;

    let lib_dir = lib_dir.to_path_buf();
    let require = lua.create_function(move |lua, name: String| {
        let cache: Table = lua.named_registry_value(LIBRARY_CACHE)?;
        let cached: Value = cache.get(name.as_str())?;
        if !matches!(cached, Value::Nil) {
            return Ok(cached);
        }
        let path = lib_dir.join(format!("{name}.lua"));
        let source = fs::read_to_string(&path).map_err(|err| {
            mlua::Error::external(format!("reading library {}: {err}", path.display()))
        })?;
        let value: Value = lua
            .load(source.as_str())
            .set_name(format!("@{name}.lua"))
            .eval()?;
        let stored = match &value {
            Value::Nil => Value::Boolean(true),
            other => other.clone(),
        };
        cache.set(name.as_str(), stored)?;
        Ok(value)
    })?;
    globals.set("Require", require)?;

    let session = Arc::clone(http);
    let get = lua.create_function(move |lua, url: String| {
        let response = session.get(&url).map_err(external)?;
        ensure_success(&url, &response)?;
        lua.create_string(&response.body)
    })?;
    globals.set("GET", get)?;

    let session = Arc::clone(http);
    let post = lua.create_function(
        move |lua, (url, body, content_type): (String, Option<String>, Option<String>)| {
            let content_type =
                content_type.unwrap_or_else(|| "application/x-www-form-urlencoded".to_string());
            let response = session
                .post(&url, body.as_deref().unwrap_or(""), &content_type)
                .map_err(external)?;
            ensure_success(&url, &response)?;
            lua.create_string(&response.body)
        },
    )?;
    globals.set("POST", post)?;

    lua.load(PRELUDE).set_name("@prelude.lua").exec()
}

fn external(err: anyhow::Error) -> mlua::Error {
    mlua::Error::external(format!("{err:#}"))
}

fn ensure_success(url: &str, response: &HttpResponse) -> mlua::Result<()> {
    if response.is_success() {
        Ok(())
    } else {
        Err(mlua::Error::RuntimeError(format!(
            "HTTP {} for {url}",
            response.status
        )))
    }
}

fn read_extension(
    lua: &Lua,
    source: &str,
    path: &Path,
    metadata: &ScriptMetadata,
) -> Result<Loaded> {
    let value: Value = lua
        .load(source)
        .set_name(chunk_name(path))
        .eval()
        .with_context(|| format!("running {}", path.display()))?;
    let Value::Table(table) = value else {
        bail!("{} did not return an extension table", path.display());
    };

    let id = match table.get::<_, Option<i32>>("id")? {
        Some(id) => id,
        None => metadata
            .id
            .ok_or_else(|| anyhow!("{} declares no extension id", path.display()))?,
    };
    let name = table
        .get::<_, Option<String>>("name")?
        .ok_or_else(|| anyhow!("{} declares no extension name", path.display()))?;
    let has_search = table.get::<_, Option<bool>>("hasSearch")?.unwrap_or(true);

    for required in ["parseNovel", "getPassage"] {
        if table.get::<_, Option<Function>>(required)?.is_none() {
            bail!("{} does not define `{required}`", path.display());
        }
    }
    if has_search && table.get::<_, Option<Function>>("search")?.is_none() {
        bail!("{} declares search support but does not define `search`", path.display());
    }

    let mut listing_fns = Vec::new();
    let listings = listing_from(lua, table.get::<_, Value>("listings")?, &mut listing_fns)
        .with_context(|| format!("listings of {}", path.display()))?;

    let profile = Profile {
        id,
        name,
        base_url: table.get::<_, Option<String>>("baseURL")?.unwrap_or_default(),
        image_url: table.get::<_, Option<String>>("imageURL")?.unwrap_or_default(),
        has_search,
        is_search_incrementing: table
            .get::<_, Option<bool>>("isSearchIncrementing")?
            .unwrap_or(true),
        has_cloudflare: table.get::<_, Option<bool>>("hasCloudFlare")?.unwrap_or(false),
        start_index: table.get::<_, Option<i32>>("startIndex")?.unwrap_or(1),
        settings: filters_from(table.get::<_, Value>("settings")?)
            .with_context(|| format!("settings of {}", path.display()))?,
        search_filters: filters_from(table.get::<_, Value>("searchFilters")?)
            .with_context(|| format!("search filters of {}", path.display()))?,
        listings,
    };
    let table = lua.create_registry_value(table)?;
    Ok(Loaded {
        table,
        listing_fns,
        profile,
    })
}

fn listing_from<'lua>(
    lua: &'lua Lua,
    value: Value<'lua>,
    fns: &mut Vec<Option<RegistryKey>>,
) -> Result<Listing> {
    match value {
        Value::Nil => Ok(Listing::List(Vec::new())),
        Value::Table(table) => {
            if table.get::<_, Option<String>>("__kind")?.as_deref() == Some("listing") {
                let handle = fns.len();
                let func = table.get::<_, Option<Function>>("fn")?;
                fns.push(func.map(|func| lua.create_registry_value(func)).transpose()?);
                Ok(Listing::Item(ListingItem {
                    name: table.get::<_, Option<String>>("name")?.unwrap_or_default(),
                    link: table.get::<_, Option<String>>("link")?,
                    is_incrementing: table
                        .get::<_, Option<bool>>("isIncrementing")?
                        .unwrap_or(false),
                    handle,
                }))
            } else {
                let mut children = Vec::new();
                for child in table.sequence_values::<Value>() {
                    children.push(listing_from(lua, child?, fns)?);
                }
                Ok(Listing::List(children))
            }
        }
        other => bail!("expected a listing table, got {}", other.type_name()),
    }
}

fn filters_from(value: Value) -> Result<Vec<Filter>> {
    match value {
        Value::Nil => Ok(Vec::new()),
        Value::Table(table) => table
            .sequence_values::<Table>()
            .map(|entry| filter_from(&entry?))
            .collect(),
        other => bail!("expected a filter list, got {}", other.type_name()),
    }
}

fn filter_from(table: &Table) -> Result<Filter> {
    let kind = table
        .get::<_, Option<String>>("type")?
        .ok_or_else(|| anyhow!("filter table has no `type`"))?;
    let id = table.get::<_, Option<i32>>("id")?.unwrap_or(-1);
    let name = table.get::<_, Option<String>>("name")?.unwrap_or_default();
    let bool_state = || -> Result<bool> { Ok(table.get::<_, Option<bool>>("state")?.unwrap_or(false)) };
    let int_state = || -> Result<i32> { Ok(table.get::<_, Option<i32>>("state")?.unwrap_or(0)) };
    let text_state =
        || -> Result<String> { Ok(table.get::<_, Option<String>>("state")?.unwrap_or_default()) };
    let choices = || -> Result<Vec<String>> {
        Ok(table.get::<_, Option<Vec<String>>>("choices")?.unwrap_or_default())
    };

    let kind = match kind.as_str() {
        "Checkbox" => FilterKind::Checkbox(bool_state()?),
        "Switch" => FilterKind::Switch(bool_state()?),
        "Text" => FilterKind::Text(text_state()?),
        "Password" => FilterKind::Password(text_state()?),
        "TriState" => FilterKind::TriState(int_state()?),
        "Dropdown" => FilterKind::Dropdown {
            choices: choices()?,
            state: int_state()?,
        },
        "RadioGroup" => FilterKind::RadioGroup {
            choices: choices()?,
            state: int_state()?,
        },
        "Header" => FilterKind::Header,
        "Separator" => FilterKind::Separator,
        "Group" => FilterKind::Group(filters_from(table.get::<_, Value>("filters")?)?),
        "List" => FilterKind::List(filters_from(table.get::<_, Value>("filters")?)?),
        other => bail!("unknown filter type `{other}` for filter {id}"),
    };
    Ok(Filter::new(id, name, kind))
}

fn params_table<'lua>(lua: &'lua Lua, params: &ParamMap) -> mlua::Result<Table<'lua>> {
    let table = lua.create_table()?;
    for (key, value) in params {
        match value {
            ParamValue::Null => {}
            ParamValue::Bool(value) => table.set(*key, *value)?,
            ParamValue::Int(value) => table.set(*key, *value)?,
            ParamValue::Text(value) => table.set(*key, value.as_str())?,
        }
    }
    Ok(table)
}

fn novel_infos_from(value: Value) -> Result<Vec<NovelInfo>> {
    match value {
        Value::Nil => Ok(Vec::new()),
        Value::Table(table) => table
            .sequence_values::<Table>()
            .map(|entry| -> Result<NovelInfo> {
                let entry = entry?;
                Ok(NovelInfo {
                    title: entry.get::<_, Option<String>>("title")?.unwrap_or_default(),
                    link: entry.get::<_, Option<String>>("link")?.unwrap_or_default(),
                    image_url: entry.get::<_, Option<String>>("imageURL")?.unwrap_or_default(),
                })
            })
            .collect(),
        other => bail!("expected a list of novels, got {}", other.type_name()),
    }
}

fn novel_from(table: &Table) -> Result<Novel> {
    let chapters = match table.get::<_, Value>("chapters")? {
        Value::Nil => Vec::new(),
        Value::Table(list) => list
            .sequence_values::<Table>()
            .map(|entry| chapter_from(&entry?))
            .collect::<Result<Vec<_>>>()?,
        other => bail!("expected a chapter list, got {}", other.type_name()),
    };
    Ok(Novel {
        title: table.get::<_, Option<String>>("title")?.unwrap_or_default(),
        image_url: table.get::<_, Option<String>>("imageURL")?.unwrap_or_default(),
        description: table.get::<_, Option<String>>("description")?.unwrap_or_default(),
        authors: table.get::<_, Option<Vec<String>>>("authors")?.unwrap_or_default(),
        genres: table.get::<_, Option<Vec<String>>>("genres")?.unwrap_or_default(),
        chapters,
    })
}

fn chapter_from(table: &Table) -> Result<Chapter> {
    Ok(Chapter {
        title: table.get::<_, Option<String>>("title")?.unwrap_or_default(),
        link: table.get::<_, Option<String>>("link")?.unwrap_or_default(),
        release: table.get::<_, Option<String>>("release")?.unwrap_or_default(),
        order: table.get::<_, Option<f64>>("order")?.unwrap_or(0.0),
    })
}
