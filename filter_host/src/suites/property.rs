//! Property suite: document metadata and host facts a plugin can query.

use std::cell::RefCell;
use std::ptr;
use std::rc::{Rc, Weak};

use pi_sdk::errors::{ERR_PLUG_IN_PROPERTY_UNDEFINED, MEM_FULL_ERR, NO_ERR, PARAM_ERR};
use pi_sdk::pica::PSPropertySuite1;
use pi_sdk::procs::{GetPropertyProc, K_CURRENT_PROPERTY_PROCS_COUNT, K_CURRENT_PROPERTY_PROCS_VERSION, PropertyProcs};
use pi_sdk::properties::*;
use pi_sdk::types::{Handle, OSErr, four_cc_to_string, int_to_fixed};
use serde::{Deserialize, Serialize};

use super::handle::HandleSuite;
use super::{SlotBinding, with_bound, write_out};

thread_local! {
    static ACTIVE: RefCell<Weak<RefCell<PropertySuite>>> = RefCell::new(Weak::new());
}

/// Metadata of the document being filtered plus host-level facts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentProperties {
    pub width: i32,
    pub height: i32,
    pub image_mode: i16,
    pub channel_names: Vec<String>,
    pub host_name: String,
    pub serial_string: String,
    pub title: String,
    pub caption: String,
    pub url: String,
    pub copyright: bool,
    pub watermark: bool,
    #[serde(skip)]
    pub exif: Option<Vec<u8>>,
    #[serde(skip)]
    pub xmp: Option<Vec<u8>>,
    pub ruler_units: i32,
    pub interpolation: i32,
    pub tool_tips: bool,
}

impl Default for DocumentProperties {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            image_mode: 0,
            channel_names: Vec::new(),
            host_name: "filter_host".to_string(),
            serial_string: "0".to_string(),
            title: String::new(),
            caption: String::new(),
            url: String::new(),
            copyright: false,
            watermark: false,
            exif: None,
            xmp: None,
            ruler_units: K_RULER_PIXELS,
            interpolation: K_BICUBIC,
            tool_tips: true,
        }
    }
}

/// Answer to one property query.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PropertyValue {
    Simple(isize),
    Complex(Vec<u8>),
}

pub struct PropertySuite {
    properties: DocumentProperties,
    handles: Rc<RefCell<HandleSuite>>,
    watch_suspension: isize,
}

impl PropertySuite {
    pub fn new(properties: DocumentProperties, handles: Rc<RefCell<HandleSuite>>) -> Self {
        Self {
            properties,
            handles,
            watch_suspension: 0,
        }
    }

    pub(crate) fn bind(state: &Rc<RefCell<Self>>) -> SlotBinding<Self> {
        super::bind(&ACTIVE, state)
    }

    pub fn properties(&self) -> &DocumentProperties {
        &self.properties
    }

    fn lookup(&self, key: u32, index: i32) -> Option<PropertyValue> {
        let props = &self.properties;
        let value = match key {
            PROP_NUMBER_OF_CHANNELS => PropertyValue::Simple(props.channel_names.len() as isize),
            PROP_CHANNEL_NAME => {
                let name = props.channel_names.get(usize::try_from(index).ok()?)?;
                PropertyValue::Complex(name.as_bytes().to_vec())
            }
            PROP_UNICODE_CHANNEL_NAME => {
                let name = props.channel_names.get(usize::try_from(index).ok()?)?;
                PropertyValue::Complex(name.encode_utf16().flat_map(u16::to_ne_bytes).collect())
            }
            PROP_IMAGE_MODE => PropertyValue::Simple(props.image_mode as isize),
            PROP_DOCUMENT_WIDTH => PropertyValue::Simple(props.width as isize),
            PROP_DOCUMENT_HEIGHT => PropertyValue::Simple(props.height as isize),
            PROP_NUMBER_OF_PATHS => PropertyValue::Simple(0),
            PROP_HOST_NAME => PropertyValue::Complex(props.host_name.as_bytes().to_vec()),
            PROP_SERIAL_STRING | PROP_SERIAL_STRING2 => PropertyValue::Complex(props.serial_string.as_bytes().to_vec()),
            PROP_TITLE => PropertyValue::Complex(props.title.as_bytes().to_vec()),
            PROP_CAPTION if !props.caption.is_empty() => PropertyValue::Complex(props.caption.as_bytes().to_vec()),
            PROP_URL if !props.url.is_empty() => PropertyValue::Complex(props.url.as_bytes().to_vec()),
            PROP_COPYRIGHT | PROP_COPYRIGHT2 => PropertyValue::Simple(props.copyright as isize),
            PROP_WATERMARK => PropertyValue::Simple(props.watermark as isize),
            PROP_EXIF_DATA => PropertyValue::Complex(props.exif.clone()?),
            PROP_XMP_DATA => PropertyValue::Complex(props.xmp.clone()?),
            PROP_RULER_UNITS => PropertyValue::Simple(props.ruler_units as isize),
            PROP_INTERPOLATION_METHOD => PropertyValue::Simple(props.interpolation as isize),
            PROP_BIG_NUDGE_H | PROP_BIG_NUDGE_V => PropertyValue::Simple(int_to_fixed(10) as isize),
            PROP_GRID_MAJOR => PropertyValue::Simple(int_to_fixed(1) as isize),
            PROP_GRID_MINOR => PropertyValue::Simple(4),
            PROP_TOOL_TIPS => PropertyValue::Simple(props.tool_tips as isize),
            PROP_WATCH_SUSPENSION => PropertyValue::Simple(self.watch_suspension),
            _ => return None,
        };
        Some(value)
    }

    /// Answers a query, allocating complex results from the handle suite.
    pub fn get(&mut self, signature: u32, key: u32, index: i32) -> Result<(isize, Handle), OSErr> {
        if signature != K_PHOTOSHOP_SIGNATURE {
            return Err(ERR_PLUG_IN_PROPERTY_UNDEFINED);
        }
        match self.lookup(key, index) {
            Some(PropertyValue::Simple(value)) => Ok((value, ptr::null_mut())),
            Some(PropertyValue::Complex(bytes)) => {
                let handle = self.handles.borrow_mut().new_handle_from(&bytes);
                if handle.is_null() { Err(MEM_FULL_ERR) } else { Ok((0, handle)) }
            }
            None => {
                tracing::debug!(key = %four_cc_to_string(key), index, "undefined property requested");
                Err(ERR_PLUG_IN_PROPERTY_UNDEFINED)
            }
        }
    }

    /// Applies a plugin-side change for the few writable properties.
    pub fn set(&mut self, signature: u32, key: u32, simple: isize, complex: Handle) -> OSErr {
        if signature != K_PHOTOSHOP_SIGNATURE {
            return ERR_PLUG_IN_PROPERTY_UNDEFINED;
        }
        let text = self
            .handles
            .borrow()
            .bytes(complex)
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned());
        match key {
            PROP_COPYRIGHT | PROP_COPYRIGHT2 => self.properties.copyright = simple != 0,
            PROP_WATERMARK => self.properties.watermark = simple != 0,
            PROP_WATCH_SUSPENSION => self.watch_suspension = simple,
            PROP_URL => match text {
                Some(url) => self.properties.url = url,
                None => return PARAM_ERR,
            },
            PROP_CAPTION => match text {
                Some(caption) => self.properties.caption = caption,
                None => return PARAM_ERR,
            },
            _ => return ERR_PLUG_IN_PROPERTY_UNDEFINED,
        }
        NO_ERR
    }

    pub fn create_property_procs() -> Box<PropertyProcs> {
        Box::new(PropertyProcs {
            property_procs_version: K_CURRENT_PROPERTY_PROCS_VERSION,
            num_property_procs: K_CURRENT_PROPERTY_PROCS_COUNT,
            get_property_proc: Some(get_property_proc),
            set_property_proc: Some(set_property_proc),
        })
    }

    pub fn create_pica_suite1() -> Box<PSPropertySuite1> {
        Box::new(PSPropertySuite1 {
            get_property_proc: Some(get_property_proc),
            set_property_proc: Some(set_property_proc),
        })
    }

    /// The getter alone, for the record's obsolete `getPropertyObsolete` slot.
    pub fn get_property_callback() -> GetPropertyProc {
        Some(get_property_proc)
    }
}

unsafe extern "C" fn get_property_proc(
    signature: u32,
    key: u32,
    index: i32,
    simple: *mut isize,
    complex: *mut Handle,
) -> OSErr {
    let result = with_bound(&ACTIVE, Err(PARAM_ERR), |suite| suite.get(signature, key, index));
    match result {
        Ok((value, handle)) => {
            // SAFETY: out pointers are null or writable per the property contract.
            unsafe {
                write_out(simple, value);
                if !handle.is_null() {
                    write_out(complex, handle);
                }
            }
            NO_ERR
        }
        Err(err) => err,
    }
}

unsafe extern "C" fn set_property_proc(signature: u32, key: u32, _index: i32, simple: isize, complex: Handle) -> OSErr {
    with_bound(&ACTIVE, PARAM_ERR, |suite| suite.set(signature, key, simple, complex))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::NativeArena;

    fn suite() -> (PropertySuite, Rc<RefCell<HandleSuite>>) {
        let handles = Rc::new(RefCell::new(HandleSuite::new(Rc::new(NativeArena::new()))));
        let props = DocumentProperties {
            width: 640,
            height: 480,
            channel_names: vec!["Red".into(), "Green".into(), "Blue".into()],
            ..DocumentProperties::default()
        };
        (PropertySuite::new(props, handles.clone()), handles)
    }

    #[test]
    fn simple_properties() {
        let (mut suite, _) = suite();
        assert_eq!(suite.get(K_PHOTOSHOP_SIGNATURE, PROP_DOCUMENT_WIDTH, 0), Ok((640, ptr::null_mut())));
        assert_eq!(suite.get(K_PHOTOSHOP_SIGNATURE, PROP_NUMBER_OF_CHANNELS, 0).map(|v| v.0), Ok(3));
        assert_eq!(suite.get(0, PROP_DOCUMENT_WIDTH, 0), Err(ERR_PLUG_IN_PROPERTY_UNDEFINED));
    }

    #[test]
    fn channel_names_come_back_in_handles() {
        let (mut suite, handles) = suite();
        let (_, handle) = suite.get(K_PHOTOSHOP_SIGNATURE, PROP_CHANNEL_NAME, 1).unwrap();
        assert_eq!(handles.borrow().bytes(handle).unwrap(), b"Green");
        assert_eq!(suite.get(K_PHOTOSHOP_SIGNATURE, PROP_CHANNEL_NAME, 3), Err(ERR_PLUG_IN_PROPERTY_UNDEFINED));
    }

    #[test]
    fn writable_properties() {
        let (mut suite, handles) = suite();
        let url = handles.borrow_mut().new_handle_from(b"https://example.org");
        assert_eq!(suite.set(K_PHOTOSHOP_SIGNATURE, PROP_URL, 0, url), NO_ERR);
        assert_eq!(suite.set(K_PHOTOSHOP_SIGNATURE, PROP_COPYRIGHT, 1, ptr::null_mut()), NO_ERR);
        assert_eq!(suite.properties().url, "https://example.org");
        assert!(suite.properties().copyright);
        assert_eq!(
            suite.set(K_PHOTOSHOP_SIGNATURE, PROP_DOCUMENT_WIDTH, 1, ptr::null_mut()),
            ERR_PLUG_IN_PROPERTY_UNDEFINED
        );
    }
}
