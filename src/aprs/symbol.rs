//! APRS symbol handling: table identifier, symbol code, and the
//! overlay characters permitted on the secondary table.

use crate::{Error, Result};

const NUM_UNCOMPRESSED: &str = "0123456789";
const NUM_COMPRESSED: &str = "abcdefghij";
const ALPHA: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Which symbol table a symbol comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SymbolTable {
    /// The primary table, identifier `/`.
    Primary,
    /// The secondary (alternate) table, identifier `\`.
    Secondary,
}

/// How an overlay character is written.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverlayType {
    /// Digits `0`–`9`.
    NumUncompressed,
    /// Letters `a`–`j`, standing in for digits in compressed
    /// positions.
    NumCompressed,
    /// Letters `A`–`Z`.
    Alpha,
}

/// An overlay on a secondary-table symbol.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Overlay {
    /// Character class of the overlay.
    pub overlay_type: OverlayType,
    /// Index within its class.
    pub index: u8,
}

impl Overlay {
    fn identify(c: char) -> Result<Self> {
        for (chars, overlay_type) in [
            (NUM_UNCOMPRESSED, OverlayType::NumUncompressed),
            (NUM_COMPRESSED, OverlayType::NumCompressed),
            (ALPHA, OverlayType::Alpha),
        ] {
            if let Some(index) = chars.find(c) {
                return Ok(Self {
                    overlay_type,
                    index: index as u8,
                });
            }
        }
        Err(Error::InvalidAprs(format!(
            "not a valid overlay character: {c:?}"
        )))
    }

    fn ident(&self) -> char {
        let chars = match self.overlay_type {
            OverlayType::NumUncompressed => NUM_UNCOMPRESSED,
            OverlayType::NumCompressed => NUM_COMPRESSED,
            OverlayType::Alpha => ALPHA,
        };
        chars.chars().nth(usize::from(self.index)).unwrap_or('0')
    }
}

/// An APRS symbol: table, code character, and optional overlay.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AprsSymbol {
    /// Which table the symbol code indexes.
    pub table: SymbolTable,
    /// The symbol code character.
    pub code: char,
    /// Overlay, only on secondary-table symbols.
    pub overlay: Option<Overlay>,
}

impl AprsSymbol {
    /// Interpret a table identifier and symbol code pair. A table
    /// identifier other than `/` or `\` is an overlay character, which
    /// implies the secondary table.
    pub fn new(table_ident: char, code: char) -> Result<Self> {
        let (table, overlay) = match table_ident {
            '/' => (SymbolTable::Primary, None),
            '\\' => (SymbolTable::Secondary, None),
            other => (SymbolTable::Secondary, Some(Overlay::identify(other)?)),
        };
        Ok(Self {
            table,
            code,
            overlay,
        })
    }

    /// The table identifier character to emit.
    #[must_use]
    pub fn table_ident(&self) -> char {
        match (&self.overlay, self.table) {
            (Some(overlay), _) => overlay.ident(),
            (None, SymbolTable::Primary) => '/',
            (None, SymbolTable::Secondary) => '\\',
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_and_secondary() {
        let car = AprsSymbol::new('/', '>').unwrap();
        assert_eq!(car.table, SymbolTable::Primary);
        assert_eq!(car.table_ident(), '/');
        let wx = AprsSymbol::new('\\', '_').unwrap();
        assert_eq!(wx.table, SymbolTable::Secondary);
        assert_eq!(wx.table_ident(), '\\');
    }

    #[test]
    fn overlays_imply_secondary() {
        let digi = AprsSymbol::new('3', '#').unwrap();
        assert_eq!(digi.table, SymbolTable::Secondary);
        assert_eq!(
            digi.overlay,
            Some(Overlay {
                overlay_type: OverlayType::NumUncompressed,
                index: 3
            })
        );
        assert_eq!(digi.table_ident(), '3');

        let compressed = AprsSymbol::new('d', '#').unwrap();
        assert_eq!(
            compressed.overlay.unwrap().overlay_type,
            OverlayType::NumCompressed
        );
        assert_eq!(compressed.table_ident(), 'd');
    }

    #[test]
    fn invalid_overlay_rejected() {
        assert!(AprsSymbol::new('~', '#').is_err());
    }
}
