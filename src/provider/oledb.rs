/// OLE DB Provider Plumbing
///
/// Raw interface calls against the MSOLAP provider: data-source creation and
/// initialization, session and command factories, command execution, column
/// metadata retrieval, accessor creation and rowset paging. Interface
/// pointers are the `windows` crate's reference-counted smart pointers, so
/// every early `return Err(...)` releases everything acquired so far in
/// reverse declaration order; the only manual steps are `Uninitialize`,
/// accessor handles and the CoTaskMem-allocated metadata arrays.
use crate::core::convert::utf16_to_string;
use crate::core::db::binding::{ColumnDescriptor, RowLayout, SlotSpec};
use crate::core::db::rowset::{RowHandle, RowSource};
use crate::core::db::statement::RawColumn;
use crate::core::variant::Variant;
use crate::core::{DaxqlError, Result};
use crate::provider::ComGuard;
use std::ffi::c_void;
use tracing::debug;
use windows::core::{Interface, BSTR, GUID, IUnknown, PCWSTR};
use windows::Win32::System::Com::{CoCreateInstance, CoTaskMemFree, CLSCTX_INPROC_SERVER};
use windows::Win32::System::Search::{
    IAccessor, IColumnsInfo, ICommand, ICommandProperties, ICommandText, IDBCreateCommand,
    IDBCreateSession, IDBInitialize, IDBProperties, IRowset, DBBINDING, DBCOLUMNINFO, DBPROP,
    DBPROPSET, HACCESSOR, HROW,
};
use windows::Win32::System::Variant::{
    VariantChangeType, VARIANT, VAR_CHANGE_FLAGS, VT_BOOL, VT_BSTR, VT_CY, VT_DATE, VT_EMPTY,
    VT_ERROR, VT_I1, VT_I2, VT_I4, VT_I8, VT_INT, VT_NULL, VT_R4, VT_R8, VT_UI1, VT_UI2, VT_UI4,
    VT_UI8, VT_UINT,
};

use crate::core::db::connection::ConnectionTarget;

/// MSOLAP provider class identifier.
const CLSID_MSOLAP: GUID = GUID::from_u128(0xDBC724B0_DD86_4772_BB5A_FCC6CAB2FC1A);

/// Initialization property set.
const DBPROPSET_DBINIT: GUID = GUID::from_u128(0xC8B522BA_5CF3_11CE_ADE5_00AA0044773D);
/// Rowset property set (carries the command timeout).
const DBPROPSET_ROWSET: GUID = GUID::from_u128(0xC8B522BE_5CF3_11CE_ADE5_00AA0044773D);
/// Default command dialect.
const DBGUID_DEFAULT: GUID = GUID::from_u128(0xC8B521FB_5CF3_11CE_ADE5_00AA0044773D);

const DBPROP_INIT_DATASOURCE: u32 = 0x3B;
const DBPROP_INIT_CATALOG: u32 = 0xE5;
const DBPROP_INIT_MODE: u32 = 0x3C;
const DBPROP_COMMANDTIMEOUT: u32 = 0x22;
const DBPROPOPTIONS_REQUIRED: u32 = 0;
const DB_MODE_READ: i32 = 0x1;

const DBPART_VALUE: u32 = 0x1;
const DBPART_LENGTH: u32 = 0x2;
const DBPART_STATUS: u32 = 0x4;
const DBMEMOWNER_CLIENTOWNED: u32 = 0;
const DBPARAMIO_NOTPARAM: u32 = 0;
const DBACCESSOR_ROWDATA: u32 = 0x2;

fn com_err(context: &str, err: windows::core::Error) -> DaxqlError {
    // The provider's own error text rides along verbatim for diagnostics.
    DaxqlError::com(err.code().0, format!("{}: {}", context, err.message()))
}

fn wide(text: &str) -> Vec<u16> {
    text.encode_utf16().chain(std::iter::once(0)).collect()
}

/// An open provider session: the initialized data source plus the command
/// factory derived from it.
///
/// Field order matters: the command factory must release before the data
/// source, and the COM guard must outlive both.
pub struct OleDbConnection {
    create_command: IDBCreateCommand,
    initialize: IDBInitialize,
    _com: ComGuard,
}

impl OleDbConnection {
    /// Creates, configures and initializes the MSOLAP data source, then
    /// derives the session command factory.
    pub fn open(target: &ConnectionTarget) -> Result<OleDbConnection> {
        let com = ComGuard::new()?;

        let initialize: IDBInitialize =
            unsafe { CoCreateInstance(&CLSID_MSOLAP, None, CLSCTX_INPROC_SERVER) }
                .map_err(|e| com_err("create MSOLAP provider", e))?;

        let properties: IDBProperties = initialize
            .cast()
            .map_err(|e| com_err("query IDBProperties", e))?;

        // Data source, catalog, and read-only mode; this adapter never
        // issues mutating commands. The VARIANTs release their BSTRs on drop.
        let mut props = [
            DBPROP {
                dwPropertyID: DBPROP_INIT_DATASOURCE,
                dwOptions: DBPROPOPTIONS_REQUIRED,
                vValue: VARIANT::from(BSTR::from(target.server.as_str())),
                ..Default::default()
            },
            DBPROP {
                dwPropertyID: DBPROP_INIT_CATALOG,
                dwOptions: DBPROPOPTIONS_REQUIRED,
                vValue: VARIANT::from(BSTR::from(target.database.as_str())),
                ..Default::default()
            },
            DBPROP {
                dwPropertyID: DBPROP_INIT_MODE,
                dwOptions: DBPROPOPTIONS_REQUIRED,
                vValue: VARIANT::from(DB_MODE_READ),
                ..Default::default()
            },
        ];
        let mut propset = DBPROPSET {
            rgProperties: props.as_mut_ptr(),
            cProperties: props.len() as u32,
            guidPropertySet: DBPROPSET_DBINIT,
        };
        unsafe { properties.SetProperties(1, &mut propset) }
            .map_err(|e| com_err("set connection properties", e))?;

        unsafe { initialize.Initialize() }
            .map_err(|e| com_err("initialize data source", e))?;

        // From here on, failure must undo the Initialize before the smart
        // pointers release the data source.
        let create_command = match Self::create_session(&initialize) {
            Ok(factory) => factory,
            Err(e) => {
                unsafe {
                    let _ = initialize.Uninitialize();
                }
                return Err(e);
            }
        };

        debug!(server = %target.server, database = %target.database, "provider session open");
        Ok(OleDbConnection {
            create_command,
            initialize,
            _com: com,
        })
    }

    fn create_session(initialize: &IDBInitialize) -> Result<IDBCreateCommand> {
        let create_session: IDBCreateSession = initialize
            .cast()
            .map_err(|e| com_err("query IDBCreateSession", e))?;

        let mut session: Option<IUnknown> = None;
        unsafe {
            create_session.CreateSession(None, &IDBCreateCommand::IID, &mut session)
        }
        .map_err(|e| com_err("create session", e))?;

        session
            .ok_or_else(|| {
                DaxqlError::Connection("provider returned no session object".to_string())
            })?
            .cast()
            .map_err(|e| com_err("query IDBCreateCommand", e))
    }

    pub(crate) fn command_factory(&self) -> &IDBCreateCommand {
        &self.create_command
    }
}

impl Drop for OleDbConnection {
    fn drop(&mut self) {
        unsafe {
            let _ = self.initialize.Uninitialize();
        }
        // Interface releases happen in field order: factory, then source.
    }
}

/// A compiled provider command.
pub struct OleDbStatement {
    text: ICommandText,
    command: ICommand,
    rowset: Option<IRowset>,
    columns: Vec<RawColumn>,
}

impl OleDbStatement {
    /// Creates the command, sets its text under the default dialect and
    /// best-effort applies the command timeout.
    pub fn prepare(
        connection: &OleDbConnection,
        query: &str,
        timeout_seconds: u64,
    ) -> Result<OleDbStatement> {
        let mut created: Option<IUnknown> = None;
        unsafe {
            connection
                .command_factory()
                .CreateCommand(None, &ICommand::IID, &mut created)
        }
        .map_err(|e| com_err("create command", e))?;
        let command: ICommand = created
            .ok_or_else(|| DaxqlError::Query("provider returned no command object".to_string()))?
            .cast()
            .map_err(|e| com_err("query ICommand", e))?;

        let text: ICommandText = command
            .cast()
            .map_err(|e| com_err("query ICommandText", e))?;

        let query_wide = wide(query);
        unsafe { text.SetCommandText(&DBGUID_DEFAULT, PCWSTR(query_wide.as_ptr())) }
            .map_err(|e| com_err("set command text", e))?;

        // Best effort: providers that reject the timeout property are
        // tolerated silently.
        if let Ok(cmd_props) = command.cast::<ICommandProperties>() {
            let mut prop = [DBPROP {
                dwPropertyID: DBPROP_COMMANDTIMEOUT,
                dwOptions: DBPROPOPTIONS_REQUIRED,
                vValue: VARIANT::from(timeout_seconds as i32),
                ..Default::default()
            }];
            let mut propset = DBPROPSET {
                rgProperties: prop.as_mut_ptr(),
                cProperties: 1,
                guidPropertySet: DBPROPSET_ROWSET,
            };
            let _ = unsafe { cmd_props.SetProperties(1, &mut propset) };
        }

        Ok(OleDbStatement {
            text,
            command,
            rowset: None,
            columns: Vec::new(),
        })
    }

    /// Executes the command and retrieves column metadata.
    ///
    /// Metadata is fetched immediately after execution, before any binding
    /// work, because the layout depends on column count and types.
    pub fn execute(&mut self) -> Result<Vec<RawColumn>> {
        if self.rowset.is_some() {
            return Err(DaxqlError::Query(
                "statement already executed; a statement carries one cursor".to_string(),
            ));
        }

        let mut unknown: Option<IUnknown> = None;
        unsafe {
            self.command.Execute(
                None,
                &IRowset::IID,
                std::ptr::null_mut(),
                None,
                Some(&mut unknown),
            )
        }
        .map_err(|e| com_err("execute command", e))?;

        let rowset: IRowset = unknown
            .ok_or_else(|| DaxqlError::Query("provider returned no rowset".to_string()))?
            .cast()
            .map_err(|e| com_err("query IRowset", e))?;

        let columns = read_column_info(&rowset)?;
        debug!(columns = columns.len(), "command executed");

        self.columns = columns.clone();
        self.rowset = Some(rowset);
        Ok(columns)
    }

    /// Builds the accessor for the planned layout and hands back the pageable
    /// row source.
    ///
    /// The per-binding status array is inspected entry by entry; a single
    /// overall failure return does not say which column was rejected.
    pub fn open_rowset(&mut self, layout: &RowLayout) -> Result<Box<dyn RowSource>> {
        let rowset = self
            .rowset
            .take()
            .ok_or_else(|| DaxqlError::Query("statement not executed".to_string()))?;

        let accessor: IAccessor = rowset
            .cast()
            .map_err(|e| com_err("query IAccessor", e))?;

        let bindings: Vec<DBBINDING> = layout
            .bound_slots()
            .map(|slot| DBBINDING {
                iOrdinal: slot.ordinal as usize,
                obValue: slot.value_offset,
                obLength: slot.length_offset,
                obStatus: slot.status_offset,
                dwPart: DBPART_VALUE | DBPART_LENGTH | DBPART_STATUS,
                dwMemOwner: DBMEMOWNER_CLIENTOWNED,
                eParamIO: DBPARAMIO_NOTPARAM,
                cbMaxLen: slot.value_size,
                wType: slot.kind.bind_type(),
                ..Default::default()
            })
            .collect();

        let mut statuses = vec![0u32; bindings.len()];
        let mut haccessor: HACCESSOR = 0;
        let created = unsafe {
            accessor.CreateAccessor(
                DBACCESSOR_ROWDATA,
                bindings.len(),
                bindings.as_ptr(),
                layout.row_size(),
                &mut haccessor,
                Some(statuses.as_mut_ptr()),
            )
        };
        // Check the per-binding statuses first: they identify the failing
        // column where the overall HRESULT cannot.
        layout.check_binding_statuses(&statuses)?;
        created.map_err(|e| com_err("create accessor", e))?;

        let descriptors: Vec<ColumnDescriptor> = self
            .columns
            .iter()
            .map(|raw| ColumnDescriptor {
                ordinal: raw.ordinal,
                name: raw.name.clone().unwrap_or_default(),
                db_type: crate::core::value::DbType::from_raw(raw.type_tag),
            })
            .collect();

        Ok(Box::new(OleDbRowset {
            columns: descriptors,
            haccessor,
            accessor,
            rowset,
        }))
    }
}

/// Reads column metadata off an executed rowset, freeing the provider's
/// CoTaskMem allocations on every path.
fn read_column_info(rowset: &IRowset) -> Result<Vec<RawColumn>> {
    let columns_info: IColumnsInfo = rowset
        .cast()
        .map_err(|e| com_err("query IColumnsInfo", e))?;

    let mut count: usize = 0;
    let mut infos: *mut DBCOLUMNINFO = std::ptr::null_mut();
    let mut strings = windows::core::PWSTR::null();
    unsafe { columns_info.GetColumnInfo(&mut count, &mut infos, &mut strings) }
        .map_err(|e| com_err("get column info", e))?;

    let mut raw = Vec::with_capacity(count);
    unsafe {
        for i in 0..count {
            let info = &*infos.add(i);
            let name = if info.pwszName.is_null() {
                None
            } else {
                Some(utf16_to_string(info.pwszName.as_wide()))
            };
            raw.push(RawColumn {
                ordinal: info.iOrdinal as u64,
                name,
                type_tag: info.wType,
            });
        }
        CoTaskMemFree(Some(infos as *const c_void));
        CoTaskMemFree(Some(strings.0 as *const c_void));
    }
    Ok(raw)
}

/// Pageable provider rowset bound through one accessor.
struct OleDbRowset {
    columns: Vec<ColumnDescriptor>,
    haccessor: HACCESSOR,
    accessor: IAccessor,
    rowset: IRowset,
}

impl RowSource for OleDbRowset {
    fn column_info(&mut self) -> Result<Vec<ColumnDescriptor>> {
        Ok(self.columns.clone())
    }

    fn next_rows(&mut self, max: usize) -> Result<Vec<RowHandle>> {
        let mut handles: Vec<HROW> = vec![0; max];
        let mut obtained: usize = 0;
        let mut prows = handles.as_mut_ptr();
        // DB_S_ENDOFROWSET is a success code; it reaches the obtained == 0
        // branch rather than the error path.
        unsafe {
            self.rowset
                .GetNextRows(0, 0, max as isize, &mut obtained, &mut prows)
        }
        .map_err(|e| com_err("get next rows", e))?;

        handles.truncate(obtained);
        Ok(handles.into_iter().map(|h| RowHandle(h as u64)).collect())
    }

    fn row_data(&mut self, row: RowHandle, _layout: &RowLayout, buffer: &mut [u8]) -> Result<()> {
        unsafe {
            self.rowset.GetData(
                row.0 as HROW,
                self.haccessor,
                buffer.as_mut_ptr() as *mut c_void,
            )
        }
        .map_err(|e| com_err("get row data", e))
    }

    fn release_rows(&mut self, rows: &[RowHandle]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let handles: Vec<HROW> = rows.iter().map(|r| r.0 as HROW).collect();
        unsafe {
            self.rowset
                .ReleaseRows(handles.len(), handles.as_ptr(), None, None, None)
        }
        .map_err(|e| com_err("release rows", e))
    }
}

impl Drop for OleDbRowset {
    fn drop(&mut self) {
        // Accessor handle before accessor interface, both before the rowset.
        unsafe {
            let _ = self.accessor.ReleaseAccessor(self.haccessor, None);
        }
    }
}

/// Decodes (and clears) the tagged-union slot at `spec` inside a fetched row
/// buffer.
///
/// The union is copied into aligned storage first; the buffer's copy is then
/// zeroed so ownership of any BSTR payload moves with the copy, which is
/// cleared exactly once when it drops.
pub fn decode_variant_slot(spec: &SlotSpec, buffer: &mut [u8]) -> Result<Variant> {
    let size = std::mem::size_of::<VARIANT>();
    debug_assert!(spec.value_size >= size, "variant slot too small");

    let mut var = VARIANT::default();
    unsafe {
        std::ptr::copy_nonoverlapping(
            buffer.as_ptr().add(spec.value_offset),
            &mut var as *mut VARIANT as *mut u8,
            size,
        );
    }
    buffer[spec.value_offset..spec.value_offset + size].fill(0);

    let decoded = unsafe { decode_variant(&var) };
    // `var` drops here and runs VariantClear on the one live copy.
    decoded
}

unsafe fn decode_variant(var: &VARIANT) -> Result<Variant> {
    let vt = var.Anonymous.Anonymous.vt;
    let payload = &var.Anonymous.Anonymous.Anonymous;

    let value = match vt {
        VT_EMPTY => Variant::Empty,
        VT_NULL => Variant::Null,
        VT_I1 => Variant::I1(payload.cVal as i8),
        VT_I2 => Variant::I2(payload.iVal),
        VT_I4 | VT_INT => Variant::I4(payload.lVal),
        VT_I8 => Variant::I8(payload.llVal),
        VT_UI1 => Variant::UI1(payload.bVal),
        VT_UI2 => Variant::UI2(payload.uiVal),
        VT_UI4 | VT_UINT => Variant::UI4(payload.ulVal),
        VT_UI8 => Variant::UI8(payload.ullVal),
        VT_R4 => Variant::R4(payload.fltVal),
        VT_R8 => Variant::R8(payload.dblVal),
        VT_BOOL => Variant::Bool(payload.boolVal.as_bool()),
        VT_CY => Variant::Currency(payload.cyVal.int64),
        VT_DATE => Variant::Date(payload.date),
        VT_ERROR => Variant::Error(payload.scode),
        VT_BSTR => Variant::Text(utf16_to_string(payload.bstrVal.as_wide())),
        other => {
            // Unknown tags degrade to their textual rendering; DECIMAL also
            // lands here and round-trips through the provider's formatter.
            let mut text = VARIANT::default();
            match VariantChangeType(&mut text, var, VAR_CHANGE_FLAGS(0), VT_BSTR) {
                Ok(()) => {
                    let rendered =
                        utf16_to_string(text.Anonymous.Anonymous.Anonymous.bstrVal.as_wide());
                    Variant::Text(rendered)
                }
                Err(_) => {
                    return Err(DaxqlError::Convert(format!(
                        "unsupported variant tag {}",
                        other.0
                    )))
                }
            }
        }
    };
    Ok(value)
}
