//! Pretty printer for schema types.
//!
//! The output re-parses to the same type: `parse(print(mn)) == mn`.

use pretty::RcDoc;

use crate::schema::{Mn, ValueType};

/// Render width used by the `Display` impls.
pub const WIDTH: usize = 80;

const INDENT: isize = 2;

pub fn mn(mn: &Mn) -> RcDoc<'_> {
    match mn {
        Mn::Nullable(vtype) => value_type(vtype).append("?"),
        Mn::NotNullable(vtype) => value_type(vtype),
    }
}

pub fn value_type(vtype: &ValueType) -> RcDoc<'_> {
    match vtype {
        ValueType::Mac(mac) => RcDoc::text(mac.name()),
        ValueType::Usr(user) => RcDoc::text(user.name.as_str()),
        ValueType::Vec(dim, item) => mn(item).append(format!("[{}]", dim)),
        ValueType::List(item) => mn(item).append("[]"),
        ValueType::Map(key, value) => mn(value).append("[").append(mn(key)).append("]"),
        ValueType::Tup(items) => RcDoc::text("(")
            .append(
                RcDoc::intersperse(items.iter().map(mn), RcDoc::text(";").append(RcDoc::line()))
                    .nest(INDENT)
                    .group(),
            )
            .append(")"),
        ValueType::Rec(fields) => RcDoc::text("{")
            .append(
                RcDoc::intersperse(
                    fields.iter().map(|(name, field)| {
                        RcDoc::text(name.as_str()).append(": ").append(mn(field))
                    }),
                    RcDoc::text(";").append(RcDoc::line()),
                )
                .nest(INDENT)
                .group(),
            )
            .append("}"),
    }
}

/// Render a maybe-nullable type to a string.
pub fn mn_to_string(value: &Mn) -> String {
    mn(value).pretty(WIDTH).to_string()
}

#[cfg(test)]
mod tests {
    use crate::schema::parser::parse;

    fn round_trip(source: &str) {
        let parsed = parse(0, source).unwrap();
        let printed = super::mn_to_string(&parsed);
        let reparsed = parse(0, &printed)
            .unwrap_or_else(|err| panic!("printed form {:?} failed: {:?}", printed, err));
        assert_eq!(parsed, reparsed, "round trip of {:?} via {:?}", source, printed);
    }

    #[test]
    fn round_trips() {
        round_trip("u8");
        round_trip("string?");
        round_trip("u8?[3]");
        round_trip("u8[3]?");
        round_trip("i40[]");
        round_trip("(u8; bool; float?)");
        round_trip("{a: u8; b: string?}");
        round_trip("bool[string]");
        round_trip("(u8; bool[string])[]?[string?[u8?]]");
        round_trip("{deep: {deeper: (u128?; char[2])[]}; flag: bool}?");
    }
}
